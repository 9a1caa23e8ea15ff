use std::fmt;

use crate::error::Error;
use crate::{Result, stomp::ACCEPT_VERSION};

/// STOMP frame commands used by this client.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Error,
    Disconnect,
    Receipt,
}

impl Command {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
            Self::Receipt => "RECEIPT",
        }
    }

    fn from_line(line: &str) -> Result<Self> {
        match line {
            "CONNECT" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "SEND" => Ok(Self::Send),
            "MESSAGE" => Ok(Self::Message),
            "ERROR" => Ok(Self::Error),
            "DISCONNECT" => Ok(Self::Disconnect),
            "RECEIPT" => Ok(Self::Receipt),
            other => Err(Error::validation(format!("unknown STOMP command `{other}`"))),
        }
    }

    /// Header escaping applies to every frame except the connect handshake pair.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    #[must_use]
    pub fn new(command: Command, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            command,
            headers,
            body: body.into(),
        }
    }

    /// `CONNECT` frame advertising the given host and heartbeat intervals (ms).
    #[must_use]
    pub fn connect(host: &str, heartbeat: (u64, u64)) -> Self {
        Self::new(
            Command::Connect,
            vec![
                ("accept-version".to_owned(), ACCEPT_VERSION.to_owned()),
                ("host".to_owned(), host.to_owned()),
                (
                    "heart-beat".to_owned(),
                    format!("{},{}", heartbeat.0, heartbeat.1),
                ),
            ],
            "",
        )
    }

    /// `SUBSCRIBE` frame for a single topic.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(
            Command::Subscribe,
            vec![
                ("id".to_owned(), id.to_owned()),
                ("destination".to_owned(), destination.to_owned()),
            ],
            "",
        )
    }

    /// `SEND` frame carrying a JSON body to a destination.
    #[must_use]
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(
            Command::Send,
            vec![
                ("destination".to_owned(), destination.to_owned()),
                ("content-type".to_owned(), "application/json".to_owned()),
            ],
            body,
        )
    }

    /// Broker-style `MESSAGE` frame. Used by mock brokers in tests.
    #[must_use]
    pub fn message(destination: &str, subscription: &str, body: impl Into<String>) -> Self {
        Self::new(
            Command::Message,
            vec![
                ("destination".to_owned(), destination.to_owned()),
                ("subscription".to_owned(), subscription.to_owned()),
                ("message-id".to_owned(), "0".to_owned()),
            ],
            body,
        )
    }

    /// `UNSUBSCRIBE` frame for a previously issued subscription id.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(
            Command::Unsubscribe,
            vec![("id".to_owned(), id.to_owned())],
            "",
        )
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect, Vec::new(), "")
    }

    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// First header with the given name, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialize to the wire form: command line, headers, blank line, body, NUL.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape_headers = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape_headers {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one inbound transport message.
    ///
    /// Returns `Ok(None)` for heartbeat frames (a bare EOL). Frames with an
    /// unknown command or a missing body separator are parse errors; the
    /// caller drops them without touching connection state.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        if raw.is_empty() || raw == "\n" || raw == "\r\n" {
            return Ok(None);
        }

        let trimmed = raw.trim_end_matches('\0');
        let (head, body) = trimmed
            .split_once("\n\n")
            .ok_or_else(|| Error::validation("STOMP frame missing header/body separator"))?;

        let mut lines = head.lines();
        let command_line = lines
            .next()
            .ok_or_else(|| Error::validation("empty STOMP frame"))?;
        let command = Command::from_line(command_line.trim_end_matches('\r'))?;

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::validation(format!("malformed STOMP header `{line}`")))?;
            if command.escapes_headers() {
                headers.push((unescape(name), unescape(value)));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        // Body ends at the frame NUL; content-length is advisory for our
        // one-frame-per-message transports.
        let body = body.split('\0').next().unwrap_or_default();

        Ok(Some(Self::new(command, headers, body)))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frame ({} headers)", self.command, self.headers.len())
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse a `heart-beat` header (`"sx,sy"` in milliseconds).
#[must_use]
pub fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (sx, sy) = value.split_once(',')?;
    Some((sx.trim().parse().ok()?, sy.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    #![expect(clippy::unwrap_used, reason = "test setup is infallible by construction")]

    use super::*;

    #[test]
    fn encode_connect_frame() {
        let frame = Frame::connect("localhost", (10_000, 10_000));
        let wire = frame.encode();
        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("accept-version:1.2\n"));
        assert!(wire.contains("heart-beat:10000,10000\n"));
        assert!(wire.ends_with("\n\n\0"));
    }

    #[test]
    fn encode_send_frame_includes_content_length() {
        let frame = Frame::send("/app/echo", r#"{"ok":true}"#);
        let wire = frame.encode();
        assert!(wire.contains("destination:/app/echo\n"));
        assert!(wire.contains("content-length:11\n"));
        assert!(wire.ends_with("{\"ok\":true}\0"));
    }

    #[test]
    fn parse_connected_frame() {
        let frame = Frame::parse("CONNECTED\nversion:1.2\nheart-beat:5000,5000\n\n\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.command(), Command::Connected);
        assert_eq!(frame.header("heart-beat"), Some("5000,5000"));
        assert_eq!(frame.body(), "");
    }

    #[test]
    fn parse_message_frame_with_body() {
        let wire = Frame::message("/topic/vehicle-check", "sub-0", r#"{"message":"ok"}"#).encode();
        let frame = Frame::parse(&wire).unwrap().unwrap();
        assert_eq!(frame.command(), Command::Message);
        assert_eq!(frame.header("destination"), Some("/topic/vehicle-check"));
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.body(), r#"{"message":"ok"}"#);
    }

    #[test]
    fn encode_unsubscribe_frame_carries_id() {
        let wire = Frame::unsubscribe("sub-0").encode();
        assert!(wire.starts_with("UNSUBSCRIBE\n"));
        assert!(wire.contains("id:sub-0\n"));
    }

    #[test]
    fn parse_heartbeat_is_none() {
        assert!(Frame::parse("\n").unwrap().is_none());
        assert!(Frame::parse("\r\n").unwrap().is_none());
    }

    #[test]
    fn parse_unknown_command_is_error() {
        assert!(Frame::parse("BOGUS\n\nbody\0").is_err());
    }

    #[test]
    fn header_escaping_round_trips() {
        let frame = Frame::new(
            Command::Send,
            vec![("reply-to".to_owned(), "queue:a\nb".to_owned())],
            "",
        );
        let wire = frame.encode();
        assert!(wire.contains("reply-to:queue\\ca\\nb\n"));

        let parsed = Frame::parse(&wire).unwrap().unwrap();
        assert_eq!(parsed.header("reply-to"), Some("queue:a\nb"));
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let wire = Frame::connect("localhost", (0, 0)).encode();
        assert!(wire.contains("heart-beat:0,0\n"));
    }

    #[test]
    fn heart_beat_header_parses() {
        assert_eq!(parse_heart_beat("10000,10000"), Some((10_000, 10_000)));
        assert_eq!(parse_heart_beat("0, 5000"), Some((0, 5_000)));
        assert_eq!(parse_heart_beat("nope"), None);
    }
}
