use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state tracking. Exactly one value holds at any instant;
/// transitions are serialized on the connection task.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// A connection attempt is in flight; doubles as the reentrancy guard
    Connecting,
    /// Broker session established and subscribed
    Connected,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Classification of a surfaced failure; determines reconnection policy.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The channel failed to open or was severed outside the broker's control
    Transport,
    /// The broker rejected or terminated the session after the transport opened
    Protocol,
    /// An inbound frame body failed to deserialize
    Parse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("transport"),
            Self::Protocol => f.write_str("protocol"),
            Self::Parse => f.write_str("parse"),
        }
    }
}

/// The last surfaced failure, published through the client's error channel.
/// Cleared on successful connect.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// A vehicle check event published on `/topic/vehicle-check`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCheckMessage {
    /// License plate of the vehicle that was checked
    pub license_plate_number: String,
    /// Check type reported by the gate (e.g. `entry`, `exit`)
    #[serde(rename = "type")]
    pub check_type: String,
    /// When the check happened (ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,
    /// Human-readable result message
    pub message: String,
}
