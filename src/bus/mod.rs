//! In-process publish/subscribe event bus.
//!
//! Delivery is synchronous, in subscriber-registration order, and never
//! blocks a publisher: there is no persistence and no back-pressure. A
//! subscriber that fails does not stop delivery to the remaining
//! subscribers; the failure is handed to the caller-supplied error sink.
//!
//! Topic names are a closed enum rather than free-form strings, per the
//! re-architecture note against "ad-hoc event emitters with string topics".

use crate::error::{ErrorMiddleware, HearthError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Closed registry of every event name published anywhere in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// A device's capability value changed.
    DeviceUpdated,
    /// A scene finished activating.
    SceneActivated,
    /// The security subsystem changed mode.
    SecurityModeChanged,
    /// Energy snapshot refreshed.
    EnergyUpdate,
    /// Error middleware detected an error storm from one system.
    ErrorStorm,
    /// A circuit breaker transitioned to the open state.
    CircuitOpen,
    /// Supervisor is entering graceful shutdown.
    Shutdown,
}

/// Payload carried alongside a published [`Topic`].
///
/// Kept as a single JSON value rather than per-topic structs so the bus
/// itself stays generic; subscribers know the shape for the topics they
/// registered for.
pub type Payload = serde_json::Value;

/// A subscriber callback. Must complete quickly: it runs synchronously on
/// the publisher's scheduler unit.
pub type Handler = Arc<dyn Fn(Topic, &Payload) -> Result<(), String> + Send + Sync>;

/// In-process event bus owned by the supervisor.
#[derive(Default, Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<(String, Handler)>>>>,
}

/// Record of a subscriber failing to handle an event, for the caller to
/// forward into the error middleware.
pub struct DeliveryFailure {
    /// Name of the subsystem whose handler failed.
    pub system: String,
    /// The error message the handler returned.
    pub message: String,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler`, labelled `system`, to `topic`. Subscribers for a
    /// topic are invoked in the order they were registered.
    pub fn subscribe(&self, topic: Topic, system: impl Into<String>, handler: Handler) {
        self.subscribers
            .write()
            .entry(topic)
            .or_default()
            .push((system.into(), handler));
    }

    /// Publish `payload` on `topic`, invoking subscribers synchronously in
    /// registration order. Returns every handler failure encountered so the
    /// caller can record them via the error middleware; delivery continues
    /// past a failing subscriber.
    pub fn publish(&self, topic: Topic, payload: Payload) -> Vec<DeliveryFailure> {
        let mut failures = Vec::new();
        let subs = self.subscribers.read();
        if let Some(handlers) = subs.get(&topic) {
            for (system, handler) in handlers {
                if let Err(message) = handler(topic, &payload) {
                    failures.push(DeliveryFailure {
                        system: system.clone(),
                        message,
                    });
                }
            }
        }
        failures
    }

    /// Number of subscribers registered across all topics (test/diagnostic helper).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }
}

/// Forward every delivery failure from a `publish` call into the error
/// middleware, so a failing subscriber handler is never silently dropped.
/// Every `publish` call site is expected to route its return value through
/// this, per the bus's own contract above.
pub fn record_delivery_failures(errors: &ErrorMiddleware, failures: Vec<DeliveryFailure>) {
    for failure in failures {
        errors.record_error(&failure.system, &HearthError::Internal(failure.message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_registration_order_and_survives_failure() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(
            Topic::DeviceUpdated,
            "a",
            Arc::new(move |_, _| {
                o1.lock().push("a");
                Ok(())
            }),
        );
        bus.subscribe(
            Topic::DeviceUpdated,
            "b",
            Arc::new(move |_, _| Err("boom".to_string())),
        );
        let o3 = order.clone();
        bus.subscribe(
            Topic::DeviceUpdated,
            "c",
            Arc::new(move |_, _| {
                o3.lock().push("c");
                Ok(())
            }),
        );

        let failures = bus.publish(Topic::DeviceUpdated, serde_json::json!({}));

        assert_eq!(*order.lock(), vec!["a", "c"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].system, "b");
    }

    #[test]
    fn publish_to_topic_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        let failures = bus.publish(Topic::Shutdown, serde_json::json!(null));
        assert!(failures.is_empty());
    }

    #[test]
    fn subscriber_count_tracks_registrations() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(
            Topic::EnergyUpdate,
            "energy",
            Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(Topic::EnergyUpdate, serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
