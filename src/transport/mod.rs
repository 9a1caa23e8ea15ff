//! Transport channels carrying STOMP frames.
//!
//! A [`Transport`] is an ordered, full-duplex stream of text frames over a
//! negotiated real connection. [`negotiate`] prefers WebSocket and degrades
//! to SockJS-style HTTP polling when the WebSocket endpoint is unavailable,
//! mirroring the fallback behavior of the broker's `/ws` endpoint.

pub mod polling;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::Result;
use crate::error::Error;

pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

/// Which real connection a negotiated transport ended up using.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

/// An ordered, full-duplex text-frame stream owned by one protocol session.
#[async_trait]
pub trait Transport: Send {
    /// Write one frame to the channel.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Next inbound frame. `None` means the channel closed cleanly;
    /// `Some(Err(_))` means it was severed.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the channel, best effort.
    async fn close(&mut self);

    fn kind(&self) -> TransportKind;
}

/// Open a transport against the endpoint root (`{base}/ws`).
///
/// WebSocket is attempted first; on failure the HTTP polling fallback is
/// tried. Only when both fail does this return a transport error.
pub async fn negotiate(endpoint: &str, connect_timeout: Duration) -> Result<Box<dyn Transport>> {
    match timeout(connect_timeout, WebSocketTransport::connect(endpoint)).await {
        Ok(Ok(ws)) => return Ok(Box::new(ws)),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "WebSocket unavailable, falling back to HTTP polling");
        }
        Err(_) => {
            tracing::debug!("WebSocket connect timed out, falling back to HTTP polling");
        }
    }

    match timeout(connect_timeout, PollingTransport::connect(endpoint)).await {
        Ok(Ok(polling)) => Ok(Box::new(polling)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::transport("timed out opening polling transport")),
    }
}
