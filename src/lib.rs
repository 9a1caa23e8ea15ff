#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod notify;
pub mod stomp;
pub mod transport;

use url::Url;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable holding the backend base URL for [`notify::Client::from_env`].
pub const BASE_URL_VAR: &str = "VEHICLE_NOTIFY_BASE_URL";

/// Base URL used when [`BASE_URL_VAR`] is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Path of the broker's fallback-transport endpoint, relative to the base URL.
pub const WS_PATH: &str = "/ws";

/// The single topic this client subscribes to.
pub const VEHICLE_CHECK_TOPIC: &str = "/topic/vehicle-check";

/// Resolve the broker endpoint root (`{base}/ws`) from a base URL.
///
/// The base must be an absolute `http`/`https` URL; trailing slashes are
/// tolerated. Transports append their own suffixes (`/websocket` for the raw
/// WebSocket endpoint, `/{server}/{session}/xhr` for polling).
pub fn ws_endpoint(base_url: &str) -> Result<String> {
    let url = Url::parse(base_url)?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::validation(format!(
                "unsupported base URL scheme `{other}`, expected http or https"
            )));
        }
    }
    let trimmed = base_url.trim_end_matches('/');
    Ok(format!("{trimmed}{WS_PATH}"))
}
