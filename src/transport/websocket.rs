use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::{Transport, TransportKind};
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport against the broker's raw endpoint (`{base}/ws/websocket`).
pub struct WebSocketTransport {
    stream: WsStream,
}

impl WebSocketTransport {
    /// Open a WebSocket against the endpoint root.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let url = ws_url(endpoint)?;
        tracing::debug!(%url, "opening WebSocket transport");
        let (stream, _) = connect_async(&url).await?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: &str) -> Result<()> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(_) => {
                    // Binary frames and transport-level pings are not part of
                    // the STOMP stream.
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

/// Map the HTTP endpoint root to the raw WebSocket URL.
fn ws_url(endpoint: &str) -> Result<String> {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        Ok(format!("wss://{rest}/websocket"))
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        Ok(format!("ws://{rest}/websocket"))
    } else {
        Err(Error::validation(format!(
            "endpoint `{endpoint}` is not an http(s) URL"
        )))
    }
}
