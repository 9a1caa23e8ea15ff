use std::time::Duration;

const DEFAULT_HEARTBEAT_DURATION: Duration = Duration::from_millis(10_000);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_millis(10_000);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);

/// Configuration for the notification client.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval at which we emit heartbeat frames to the broker
    pub heartbeat_outgoing: Duration,
    /// Interval at which we expect heartbeat traffic from the broker
    pub heartbeat_incoming: Duration,
    /// Fixed delay before the single reconnect attempt after a protocol error
    pub reconnect_delay: Duration,
    /// Maximum time for transport negotiation and the connect handshake
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_outgoing: DEFAULT_HEARTBEAT_DURATION,
            heartbeat_incoming: DEFAULT_HEARTBEAT_DURATION,
            reconnect_delay: DEFAULT_RECONNECT_DELAY_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
        }
    }
}

impl Config {
    /// Heartbeat intervals in milliseconds, as advertised in the `CONNECT` frame.
    #[must_use]
    pub fn heartbeat_millis(&self) -> (u64, u64) {
        (
            u64::try_from(self.heartbeat_outgoing.as_millis()).unwrap_or(u64::MAX),
            u64::try_from(self.heartbeat_incoming.as_millis()).unwrap_or(u64::MAX),
        )
    }
}
