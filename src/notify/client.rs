use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::config::Config;
use super::dispatch::DispatchRegistry;
use super::session::{Session, SessionEvent};
use super::types::{ConnectionState, ErrorInfo, VehicleCheckMessage};
use crate::Result;

/// Subscription id used for the vehicle check topic. One session carries at
/// most one subscription, so the id is fixed.
const SUBSCRIPTION_ID: &str = "sub-0";

/// Handle to the notification client.
///
/// Cheap to clone; all clones share one background connection task and one
/// handler registry. Commands are fire-and-forget: failures surface through
/// [`Client::error_receiver`] rather than return values, and state changes
/// through [`Client::state_receiver`].
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    state_rx: watch::Receiver<ConnectionState>,
    error_rx: watch::Receiver<Option<ErrorInfo>>,
    dispatch: Arc<DispatchRegistry>,
}

impl Client {
    /// Build a client against the base URL from the `VEHICLE_NOTIFY_BASE_URL`
    /// environment variable, falling back to `http://localhost:8080`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(crate::BASE_URL_VAR)
            .unwrap_or_else(|_| crate::DEFAULT_BASE_URL.to_owned());
        Self::new(&base_url, Config::default())
    }

    /// Build a client against an explicit base URL.
    pub fn new(base_url: &str, config: Config) -> Result<Self> {
        let endpoint = crate::ws_endpoint(base_url)?;
        let host = url::Url::parse(base_url)?
            .host_str()
            .map_or_else(|| "localhost".to_owned(), str::to_owned);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (error_tx, error_rx) = watch::channel(None);
        let dispatch = Arc::new(DispatchRegistry::new(crate::VEHICLE_CHECK_TOPIC));

        let task = ConnectionTask {
            endpoint,
            host,
            config,
            dispatch: Arc::clone(&dispatch),
            cmd_tx: cmd_tx.clone(),
            state_tx,
            error_tx,
            session: None,
            reconnect: ReconnectScheduler::default(),
        };
        drop(tokio::spawn(task.run(cmd_rx)));

        Ok(Self {
            cmd_tx,
            state_rx,
            error_rx,
            dispatch,
        })
    }

    /// Open the channel. No-op while a connection is in flight or established.
    pub fn connect(&self) {
        self.command(Cmd::Connect(Trigger::Manual));
    }

    /// Tear the channel down: graceful protocol goodbye, cancel any pending
    /// reconnect, drop the installed handler. Idempotent.
    pub fn disconnect(&self) {
        self.command(Cmd::Disconnect);
    }

    /// Tear down and immediately open a fresh channel. The installed
    /// handler is kept, so delivery resumes once resubscribed.
    pub fn reconnect(&self) {
        self.command(Cmd::Reconnect);
    }

    /// Send a payload to a broker destination.
    ///
    /// Never fails at the call site: the payload is serialized to JSON and
    /// forwarded only while [`ConnectionState::Connected`]; otherwise it is
    /// logged and dropped.
    pub fn send<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(body) => self.command(Cmd::Send {
                destination: destination.to_owned(),
                body,
            }),
            Err(e) => {
                tracing::warn!(error = %e, destination, "dropping unserializable outbound message");
            }
        }
    }

    /// Install the handler invoked for each inbound vehicle check.
    ///
    /// Replaces any previous handler without touching the broker
    /// subscription; the swap takes effect for the next delivered message.
    pub fn on_vehicle_check(&self, handler: impl Fn(VehicleCheckMessage) + Send + Sync + 'static) {
        self.dispatch.replace(handler);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel carrying every state transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The last surfaced failure, or `None` after a successful connect.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.error_rx.borrow().clone()
    }

    /// Watch channel carrying error updates.
    #[must_use]
    pub fn error_receiver(&self) -> watch::Receiver<Option<ErrorInfo>> {
        self.error_rx.clone()
    }

    fn command(&self, cmd: Cmd) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::debug!("connection task no longer running");
        }
    }
}

#[derive(Debug)]
enum Cmd {
    Connect(Trigger),
    Disconnect,
    Reconnect,
    Send { destination: String, body: String },
}

/// Where a connect request came from. Scheduled requests carry the scheduler
/// generation they were issued under, so fires already queued when a teardown
/// cancels the timer are discarded instead of resurrecting the channel.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Manual,
    Scheduled(u64),
}

/// The background task owning the session and all connection state.
///
/// Single-threaded by construction: commands and session events are
/// interleaved on one task, so state transitions never race.
struct ConnectionTask {
    endpoint: String,
    host: String,
    config: Config,
    dispatch: Arc<DispatchRegistry>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<ErrorInfo>>,
    session: Option<Session>,
    reconnect: ReconnectScheduler,
}

impl ConnectionTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                event = next_session_event(self.session.as_mut()) => {
                    self.handle_event(event).await;
                },
                () = self.state_tx.closed() => break,
            }
        }
        self.teardown().await;
        self.dispatch.clear();
    }

    async fn handle_command(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Connect(trigger) => self.connect(trigger),
            Cmd::Disconnect => {
                self.teardown().await;
                self.dispatch.clear();
            }
            Cmd::Reconnect => {
                self.teardown().await;
                self.connect(Trigger::Manual);
            }
            Cmd::Send { destination, body } => self.forward(&destination, &body).await,
        }
    }

    /// Begin a connection attempt unless one is already active.
    ///
    /// `Connecting` doubles as the reentrancy guard: repeated connect
    /// requests while an attempt is in flight are dropped here, which is
    /// what keeps the channel count at one.
    fn connect(&mut self, trigger: Trigger) {
        if let Trigger::Scheduled(generation) = trigger
            && !self.reconnect.accepts(generation)
        {
            tracing::debug!("discarding stale scheduled reconnect");
            return;
        }
        let state = *self.state_tx.borrow();
        if matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::debug!(?state, "connect ignored, channel already active");
            return;
        }

        self.reconnect.cancel();
        self.state_tx.send_replace(ConnectionState::Connecting);
        self.session = Some(Session::open(
            self.endpoint.clone(),
            self.host.clone(),
            self.config.clone(),
        ));
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                if let Some(session) = self.session.as_mut()
                    && let Err(e) = session.subscribe(SUBSCRIPTION_ID, self.dispatch.topic()).await
                {
                    self.fail_transport(e.to_string()).await;
                    return;
                }
                self.reconnect.cancel();
                self.error_tx.send_replace(None);
                self.state_tx.send_replace(ConnectionState::Connected);
                tracing::info!(topic = self.dispatch.topic(), "connected and subscribed");
            }
            SessionEvent::Message(frame) => self.dispatch.deliver(&frame),
            SessionEvent::ProtocolError(message) => {
                tracing::warn!(%message, "broker reported an error");
                self.close_session().await;
                self.state_tx.send_replace(ConnectionState::Disconnected);
                self.error_tx.send_replace(Some(ErrorInfo::protocol(message)));
                self.reconnect
                    .schedule(self.config.reconnect_delay, self.cmd_tx.clone());
            }
            SessionEvent::TransportError(message) => {
                // Transport failures do not auto-reconnect; the caller
                // decides whether to retry.
                tracing::warn!(%message, "transport failed");
                self.fail_transport(message).await;
            }
            SessionEvent::Disconnected => {
                tracing::info!("broker closed the session");
                self.close_session().await;
                self.state_tx.send_replace(ConnectionState::Disconnected);
            }
        }
    }

    async fn fail_transport(&mut self, message: String) {
        self.close_session().await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.error_tx.send_replace(Some(ErrorInfo::transport(message)));
    }

    async fn forward(&mut self, destination: &str, body: &str) {
        if !self.state_tx.borrow().is_connected() {
            tracing::warn!(destination, "dropping outbound message while not connected");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.publish(destination, body).await {
            self.fail_transport(e.to_string()).await;
        }
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    async fn teardown(&mut self) {
        self.reconnect.cancel();
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

async fn next_session_event(session: Option<&mut Session>) -> SessionEvent {
    match session {
        Some(session) => session.next_event().await,
        None => std::future::pending().await,
    }
}

/// At most one pending reconnect timer.
///
/// Each cancel bumps the generation, so a fire that was already queued on
/// the command channel when the timer was cancelled no longer matches and
/// is discarded by [`ConnectionTask::connect`].
#[derive(Default)]
struct ReconnectScheduler {
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

impl ReconnectScheduler {
    fn schedule(&mut self, delay: Duration, cmd_tx: mpsc::UnboundedSender<Cmd>) {
        if self.pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("reconnect already scheduled");
            return;
        }
        let generation = self.generation;
        tracing::info!(?delay, "scheduling reconnect");
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(cmd_tx.send(Cmd::Connect(Trigger::Scheduled(generation))));
        }));
    }

    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    fn accepts(&self, generation: u64) -> bool {
        generation == self.generation
    }
}
