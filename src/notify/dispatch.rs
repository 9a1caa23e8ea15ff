use std::sync::{PoisonError, RwLock};

use super::types::VehicleCheckMessage;
use crate::stomp::Frame;

type Handler = Box<dyn Fn(VehicleCheckMessage) + Send + Sync>;

/// Holds the topic subscription and the single mutable "current handler" cell.
///
/// Replacing the handler is an atomic swap of the cell; it never re-issues
/// the broker subscription, and dispatch always reads the latest binding at
/// delivery time.
pub(crate) struct DispatchRegistry {
    topic: String,
    handler: RwLock<Option<Handler>>,
}

impl DispatchRegistry {
    pub(crate) fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            handler: RwLock::new(None),
        }
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    /// Install a new current handler, replacing any previous one.
    pub(crate) fn replace(&self, handler: impl Fn(VehicleCheckMessage) + Send + Sync + 'static) {
        // A poisoned lock only means a previous handler panicked; the slot
        // itself has no intermediate state to recover.
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    pub(crate) fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Route one inbound `MESSAGE` frame.
    ///
    /// Frames for other destinations and bodies that fail to parse are
    /// logged and dropped; neither reaches the handler or mutates any state.
    pub(crate) fn deliver(&self, frame: &Frame) {
        match frame.header("destination") {
            Some(destination) if destination == self.topic => {}
            destination => {
                tracing::trace!(?destination, "dropping frame for unsubscribed destination");
                return;
            }
        }

        let message: VehicleCheckMessage = match serde_json::from_str(frame.body()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping vehicle check message with malformed body");
                return;
            }
        };

        tracing::trace!(plate = %message.license_plate_number, "delivering vehicle check");
        let guard = self.handler.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = guard.as_ref() {
            handler(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const TOPIC: &str = "/topic/vehicle-check";

    fn valid_body() -> &'static str {
        r#"{"licensePlateNumber":"51A-12345","type":"entry","timestamp":"2024-01-01T00:00:00Z","message":"ok"}"#
    }

    #[test]
    fn delivers_to_current_handler_exactly_once() {
        let registry = DispatchRegistry::new(TOPIC);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        registry.replace(move |msg| {
            assert_eq!(msg.license_plate_number, "51A-12345");
            counted.fetch_add(1, Ordering::SeqCst);
        });

        registry.deliver(&Frame::message(TOPIC, "sub-0", valid_body()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_body_never_reaches_handler() {
        let registry = DispatchRegistry::new(TOPIC);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        registry.replace(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        registry.deliver(&Frame::message(TOPIC, "sub-0", "{not json"));
        registry.deliver(&Frame::message(TOPIC, "sub-0", r#"{"type":"entry"}"#));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn other_destinations_are_dropped() {
        let registry = DispatchRegistry::new(TOPIC);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        registry.replace(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        registry.deliver(&Frame::message("/topic/other", "sub-1", valid_body()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replacing_handler_routes_to_latest() {
        let registry = DispatchRegistry::new(TOPIC);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&first);
        registry.replace(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let counted = Arc::clone(&second);
        registry.replace(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        registry.deliver(&Frame::message(TOPIC, "sub-0", valid_body()));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleared_handler_drops_messages() {
        let registry = DispatchRegistry::new(TOPIC);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        registry.replace(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        registry.clear();

        registry.deliver(&Frame::message(TOPIC, "sub-0", valid_body()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
