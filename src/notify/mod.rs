//! Real-time vehicle check notifications.
//!
//! [`Client`] owns a background task that keeps one channel to the broker:
//! it negotiates a transport (WebSocket, falling back to HTTP polling),
//! performs the messaging handshake, subscribes to the vehicle check topic,
//! and feeds inbound events to the handler installed with
//! [`Client::on_vehicle_check`]. Connection state and the last surfaced
//! error are published through watch channels.

mod client;
mod config;
mod dispatch;
mod session;
mod types;

pub use client::Client;
pub use config::Config;
pub use types::{ConnectionState, ErrorInfo, ErrorKind, VehicleCheckMessage};
