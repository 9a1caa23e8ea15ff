use std::collections::VecDeque;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng as _;
use uuid::Uuid;

use super::{Transport, TransportKind};
use crate::Result;
use crate::error::Error;

/// SockJS-style xhr-polling transport.
///
/// Sessions live under `{base}/ws/{server}/{session}`; inbound frames arrive
/// by long-polling `POST {session}/xhr`, outbound frames go through
/// `POST {session}/xhr_send` as a JSON array of frame strings. Response
/// bodies follow the SockJS framing: `o` open, `h` heartbeat, `a[...]`
/// messages, `c[...]` close.
///
/// The in-flight poll request lives in `in_flight`, not in the `recv`
/// future: the server dequeues messages into a poll response the moment it
/// answers, so an aborted wire request would lose them. Cancelling `recv`
/// leaves the request parked here and the next call resumes it.
pub struct PollingTransport {
    http: reqwest::Client,
    session_url: String,
    buffered: VecDeque<String>,
    in_flight: Option<BoxFuture<'static, Result<String>>>,
    closed: bool,
}

impl PollingTransport {
    /// Open a polling session against the endpoint root.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let server_id = rand::rng().random_range(0..1000_u16);
        let session_id = Uuid::new_v4();
        let session_url = format!("{endpoint}/{server_id:03}/{session_id}");
        tracing::debug!(%session_url, "opening polling transport");

        let http = reqwest::Client::new();
        let response = http.post(format!("{session_url}/xhr")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!(
                "polling session open failed with status {status}"
            )));
        }
        let body = response.text().await?;
        if !body.starts_with('o') {
            return Err(Error::transport(format!(
                "unexpected polling open response `{}`",
                body.trim_end()
            )));
        }

        Ok(Self {
            http,
            session_url,
            buffered: VecDeque::new(),
            in_flight: None,
            closed: false,
        })
    }
}

async fn poll_once(http: reqwest::Client, url: String) -> Result<String> {
    let response = http.post(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::transport(format!(
            "polling request failed with status {status}"
        )));
    }
    Ok(response.text().await?)
}

#[async_trait]
impl Transport for PollingTransport {
    async fn send(&mut self, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/xhr_send", self.session_url))
            .json(&[text])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!(
                "polling send failed with status {status}"
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(frame) = self.buffered.pop_front() {
                return Some(Ok(frame));
            }
            if self.closed {
                return None;
            }

            let poll = {
                let http = &self.http;
                let session_url = &self.session_url;
                self.in_flight.get_or_insert_with(|| {
                    Box::pin(poll_once(http.clone(), format!("{session_url}/xhr")))
                })
            };
            let body = poll.as_mut().await;
            self.in_flight = None;
            let body = match body {
                Ok(body) => body,
                Err(e) => return Some(Err(e)),
            };
            let body = body.trim_end();

            if body == "o" || body == "h" {
                continue;
            }
            if let Some(payload) = body.strip_prefix('a') {
                match serde_json::from_str::<Vec<String>>(payload) {
                    Ok(frames) => self.buffered.extend(frames),
                    Err(e) => {
                        return Some(Err(Error::transport(format!(
                            "malformed polling payload: {e}"
                        ))));
                    }
                }
                continue;
            }
            if body.starts_with('c') {
                // Server-initiated close; drain anything already buffered.
                self.closed = true;
                continue;
            }

            return Some(Err(Error::transport(format!(
                "unexpected polling response `{body}`"
            ))));
        }
    }

    async fn close(&mut self) {
        // No client close endpoint in the polling convention; the server
        // expires the session once polling stops.
        self.in_flight = None;
        self.closed = true;
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }
}
