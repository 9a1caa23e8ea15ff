//! STOMP 1.2 frame codec.
//!
//! The broker speaks STOMP over whichever transport channel was negotiated.
//! This module only covers the frame surface the notification client needs:
//! the connect handshake, a single subscription, outbound sends, broker
//! errors, and heartbeat frames.

pub mod frame;

pub use frame::{Command, Frame, parse_heart_beat};

/// STOMP protocol version offered during the connect handshake.
pub const ACCEPT_VERSION: &str = "1.2";
