use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Instant, Interval, interval_at, sleep_until};

use super::config::Config;
use crate::error::Error;
use crate::stomp::{Command, Frame, parse_heart_beat};
use crate::Result;
use crate::transport::{self, Transport};

/// Events a [`Session`] surfaces to the connection task, one per call to
/// [`Session::next_event`]. These are the four callback classes of the
/// protocol adapter; the distinction between `ProtocolError` and
/// `TransportError` drives reconnection policy.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The broker accepted the connect handshake
    Connected,
    /// An inbound `MESSAGE` frame
    Message(Frame),
    /// The broker rejected or terminated the session after the transport opened
    ProtocolError(String),
    /// The channel failed to open, was severed, or went silent
    TransportError(String),
    /// The broker closed the session cleanly
    Disconnected,
}

/// One protocol session over one exclusively-owned transport channel.
///
/// Construction is non-blocking: transport negotiation and the `CONNECT`
/// frame are driven from `next_event`, so the owning task stays responsive
/// while the handshake is in flight.
pub(crate) struct Session {
    negotiating: Option<BoxFuture<'static, Result<Box<dyn Transport>>>>,
    transport: Option<Box<dyn Transport>>,
    established: bool,
    handshake_deadline: Option<Instant>,
    heartbeat_tx: Option<Interval>,
    liveness_window: Option<Duration>,
    last_received: Instant,
    subscription: Option<String>,
    config: Config,
}

impl Session {
    /// Begin opening a session against the endpoint root.
    pub(crate) fn open(endpoint: String, host: String, config: Config) -> Self {
        let heartbeat = config.heartbeat_millis();
        let connect_timeout = config.connect_timeout;
        let negotiating: BoxFuture<'static, Result<Box<dyn Transport>>> = Box::pin(async move {
            let mut channel = transport::negotiate(&endpoint, connect_timeout).await?;
            channel
                .send(&Frame::connect(&host, heartbeat).encode())
                .await?;
            Ok(channel)
        });

        Self {
            negotiating: Some(negotiating),
            transport: None,
            established: false,
            handshake_deadline: None,
            heartbeat_tx: None,
            liveness_window: None,
            last_received: Instant::now(),
            subscription: None,
            config,
        }
    }

    /// Drive the session until something reportable happens.
    ///
    /// Cancellation-safe: in-flight negotiation lives in `self`, so the
    /// owning task may race this future against its command queue.
    pub(crate) async fn next_event(&mut self) -> SessionEvent {
        loop {
            if let Some(fut) = self.negotiating.as_mut() {
                let negotiated = fut.as_mut().await;
                self.negotiating = None;
                match negotiated {
                    Ok(channel) => {
                        tracing::debug!(kind = ?channel.kind(), "transport open, awaiting broker handshake");
                        self.transport = Some(channel);
                        self.handshake_deadline =
                            Some(Instant::now() + self.config.connect_timeout);
                    }
                    Err(e) => return SessionEvent::TransportError(e.to_string()),
                }
                continue;
            }

            let Self {
                transport,
                established,
                handshake_deadline,
                heartbeat_tx,
                liveness_window,
                last_received,
                config,
                ..
            } = self;
            let Some(channel) = transport.as_mut() else {
                return SessionEvent::Disconnected;
            };

            let deadline = if *established {
                liveness_window.map(|window| *last_received + window)
            } else {
                *handshake_deadline
            };

            tokio::select! {
                inbound = channel.recv() => match inbound {
                    None => {
                        return if *established {
                            SessionEvent::Disconnected
                        } else {
                            SessionEvent::TransportError(
                                "connection closed during handshake".to_owned(),
                            )
                        };
                    }
                    Some(Err(e)) => return SessionEvent::TransportError(e.to_string()),
                    Some(Ok(text)) => {
                        *last_received = Instant::now();
                        match Frame::parse(&text) {
                            Ok(None) => {
                                // Heartbeat; liveness already refreshed.
                            }
                            Ok(Some(frame)) => match frame.command() {
                                Command::Connected => {
                                    let negotiated = frame
                                        .header("heart-beat")
                                        .and_then(parse_heart_beat)
                                        .unwrap_or((0, 0));
                                    let (server_tx, server_rx) = negotiated;
                                    let (client_tx, client_rx) = config.heartbeat_millis();
                                    if client_tx > 0 && server_rx > 0 {
                                        let period =
                                            Duration::from_millis(client_tx.max(server_rx));
                                        *heartbeat_tx =
                                            Some(interval_at(Instant::now() + period, period));
                                    }
                                    if client_rx > 0 && server_tx > 0 {
                                        // Twice the negotiated interval before the
                                        // channel counts as silently dead.
                                        *liveness_window = Some(
                                            Duration::from_millis(client_rx.max(server_tx)) * 2,
                                        );
                                    }
                                    *established = true;
                                    *handshake_deadline = None;
                                    return SessionEvent::Connected;
                                }
                                Command::Message if *established => {
                                    return SessionEvent::Message(frame);
                                }
                                Command::Error => {
                                    return SessionEvent::ProtocolError(broker_error(&frame));
                                }
                                Command::Receipt => {}
                                other => {
                                    tracing::trace!(command = %other, "ignoring unexpected frame");
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping unparseable frame");
                            }
                        }
                    }
                },
                () = maybe_tick(heartbeat_tx.as_mut()) => {
                    if let Err(e) = channel.send("\n").await {
                        return SessionEvent::TransportError(e.to_string());
                    }
                },
                () = maybe_sleep(deadline) => {
                    return SessionEvent::TransportError(if *established {
                        "heartbeat timed out".to_owned()
                    } else {
                        "handshake timed out".to_owned()
                    });
                },
            }
        }
    }

    /// Install the topic subscription. Issued once per session, right after
    /// the broker accepts the handshake.
    pub(crate) async fn subscribe(&mut self, id: &str, destination: &str) -> Result<()> {
        self.send_frame(&Frame::subscribe(id, destination)).await?;
        self.subscription = Some(id.to_owned());
        Ok(())
    }

    /// Forward one outbound payload as a `SEND` frame.
    pub(crate) async fn publish(&mut self, destination: &str, body: &str) -> Result<()> {
        self.send_frame(&Frame::send(destination, body)).await
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        match self.transport.as_mut() {
            Some(channel) => channel.send(&frame.encode()).await,
            None => Err(Error::transport("transport not open")),
        }
    }

    /// Abrupt close, for channels that already failed.
    pub(crate) async fn close(mut self) {
        if let Some(mut channel) = self.transport.take() {
            channel.close().await;
        }
    }

    /// Graceful shutdown: `UNSUBSCRIBE` and `DISCONNECT` best effort, then
    /// close.
    pub(crate) async fn shutdown(mut self) {
        if let Some(mut channel) = self.transport.take() {
            if self.established {
                if let Some(id) = self.subscription.as_deref()
                    && let Err(e) = channel.send(&Frame::unsubscribe(id).encode()).await
                {
                    tracing::trace!(error = %e, "UNSUBSCRIBE frame not delivered");
                }
                if let Err(e) = channel.send(&Frame::disconnect().encode()).await {
                    tracing::trace!(error = %e, "DISCONNECT frame not delivered");
                }
            }
            channel.close().await;
        }
    }
}

fn broker_error(frame: &Frame) -> String {
    if let Some(message) = frame.header("message") {
        return message.to_owned();
    }
    let body = frame.body().trim();
    if body.is_empty() {
        "broker error".to_owned()
    } else {
        body.to_owned()
    }
}

async fn maybe_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::unwrap_used, reason = "test setup is infallible by construction")]

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::TransportKind;

    struct FakeTransport {
        inbound: mpsc::UnboundedReceiver<Result<String>>,
        outbound: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&mut self, text: &str) -> Result<()> {
            self.outbound
                .send(text.to_owned())
                .map_err(|_| Error::transport("peer gone"))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.inbound.recv().await
        }

        async fn close(&mut self) {
            self.inbound.close();
        }

        fn kind(&self) -> TransportKind {
            TransportKind::WebSocket
        }
    }

    struct Peer {
        to_session: mpsc::UnboundedSender<Result<String>>,
        from_session: mpsc::UnboundedReceiver<String>,
    }

    fn handshaking_session() -> (Session, Peer) {
        handshaking_session_with(Config::default())
    }

    fn handshaking_session_with(config: Config) -> (Session, Peer) {
        let (to_session, inbound) = mpsc::unbounded_channel();
        let (outbound, from_session) = mpsc::unbounded_channel();
        let session = Session {
            negotiating: None,
            transport: Some(Box::new(FakeTransport { inbound, outbound })),
            established: false,
            handshake_deadline: Some(Instant::now() + Duration::from_secs(5)),
            heartbeat_tx: None,
            liveness_window: None,
            last_received: Instant::now(),
            subscription: None,
            config,
        };
        (
            session,
            Peer {
                to_session,
                from_session,
            },
        )
    }

    fn heartbeat_config(outgoing_ms: u64, incoming_ms: u64) -> Config {
        Config {
            heartbeat_outgoing: Duration::from_millis(outgoing_ms),
            heartbeat_incoming: Duration::from_millis(incoming_ms),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn connected_frame_establishes_session() {
        let (mut session, peer) = handshaking_session();
        peer.to_session
            .send(Ok(format!(
                "CONNECTED\nversion:{}\nheart-beat:0,0\n\n\0",
                crate::stomp::ACCEPT_VERSION
            )))
            .unwrap();

        assert!(matches!(
            session.next_event().await,
            SessionEvent::Connected
        ));
        assert!(session.established, "session should be established");
    }

    #[tokio::test]
    async fn broker_error_during_handshake_is_protocol_error() {
        let (mut session, peer) = handshaking_session();
        peer.to_session
            .send(Ok("ERROR\nmessage:auth failed\n\n\0".to_owned()))
            .unwrap();

        match session.next_event().await {
            SessionEvent::ProtocolError(message) => assert_eq!(message, "auth failed"),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_during_handshake_is_transport_error() {
        let (mut session, peer) = handshaking_session();
        drop(peer.to_session);

        assert!(matches!(
            session.next_event().await,
            SessionEvent::TransportError(_)
        ));
    }

    #[tokio::test]
    async fn clean_close_after_connect_is_disconnect() {
        let (mut session, peer) = handshaking_session();
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\n\n\0".to_owned()))
            .unwrap();
        assert!(matches!(
            session.next_event().await,
            SessionEvent::Connected
        ));

        drop(peer.to_session);
        assert!(matches!(
            session.next_event().await,
            SessionEvent::Disconnected
        ));
    }

    #[tokio::test]
    async fn message_frames_surface_after_connect() {
        let (mut session, mut peer) = handshaking_session();
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\n\n\0".to_owned()))
            .unwrap();
        let _: SessionEvent = session.next_event().await;

        session.subscribe("sub-0", "/topic/vehicle-check").await.unwrap();
        let subscribe_frame = peer.from_session.recv().await.unwrap();
        assert!(subscribe_frame.starts_with("SUBSCRIBE\n"));
        assert!(subscribe_frame.contains("destination:/topic/vehicle-check"));

        peer.to_session
            .send(Ok(Frame::message("/topic/vehicle-check", "sub-0", "{}").encode()))
            .unwrap();
        match session.next_event().await {
            SessionEvent::Message(frame) => {
                assert_eq!(frame.header("destination"), Some("/topic/vehicle-check"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_before_connect_is_dropped() {
        let (mut session, peer) = handshaking_session();
        peer.to_session
            .send(Ok(Frame::message("/topic/vehicle-check", "sub-0", "{}").encode()))
            .unwrap();
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\n\n\0".to_owned()))
            .unwrap();

        // The early MESSAGE is skipped; the next event is the handshake result.
        assert!(matches!(
            session.next_event().await,
            SessionEvent::Connected
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_are_emitted_at_the_negotiated_interval() {
        let (mut session, mut peer) = handshaking_session_with(heartbeat_config(50, 0));
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\nheart-beat:0,50\n\n\0".to_owned()))
            .unwrap();
        assert!(matches!(
            session.next_event().await,
            SessionEvent::Connected
        ));

        // No inbound traffic; the session should keep the channel warm on its own.
        let idle = tokio::time::timeout(Duration::from_millis(120), session.next_event()).await;
        assert!(idle.is_err(), "nothing reportable should happen while idle");
        assert_eq!(peer.from_session.recv().await.unwrap(), "\n");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_interval_honors_the_slower_side() {
        // We offer 50ms but the broker only wants one every 200ms.
        let (mut session, mut peer) = handshaking_session_with(heartbeat_config(50, 0));
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\nheart-beat:0,200\n\n\0".to_owned()))
            .unwrap();
        assert!(matches!(
            session.next_event().await,
            SessionEvent::Connected
        ));

        let idle = tokio::time::timeout(Duration::from_millis(120), session.next_event()).await;
        assert!(idle.is_err(), "nothing reportable should happen while idle");
        assert!(
            peer.from_session.try_recv().is_err(),
            "no heartbeat should be due before the negotiated 200ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broker_silence_past_the_liveness_window_is_a_transport_error() {
        let (mut session, peer) = handshaking_session_with(heartbeat_config(0, 50));
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\nheart-beat:50,0\n\n\0".to_owned()))
            .unwrap();
        assert!(matches!(
            session.next_event().await,
            SessionEvent::Connected
        ));

        // Twice the negotiated interval with no traffic at all.
        match session.next_event().await {
            SessionEvent::TransportError(message) => assert_eq!(message, "heartbeat timed out"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_unsubscribes_before_disconnecting() {
        let (mut session, mut peer) = handshaking_session();
        peer.to_session
            .send(Ok("CONNECTED\nversion:1.2\n\n\0".to_owned()))
            .unwrap();
        let _: SessionEvent = session.next_event().await;
        session.subscribe("sub-0", "/topic/vehicle-check").await.unwrap();
        assert!(peer.from_session.recv().await.unwrap().starts_with("SUBSCRIBE\n"));

        session.shutdown().await;

        let unsubscribe = peer.from_session.recv().await.unwrap();
        assert!(unsubscribe.starts_with("UNSUBSCRIBE\n"));
        assert!(unsubscribe.contains("id:sub-0\n"));
        assert!(peer.from_session.recv().await.unwrap().starts_with("DISCONNECT\n"));
    }
}
