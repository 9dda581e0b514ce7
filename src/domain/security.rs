//! Security domain subsystem: a small validated mode state machine, emitting
//! `security-mode-changed` whenever the mode actually transitions.

use super::Subsystem;
use crate::bus::{self, EventBus, Topic};
use crate::error::{ErrorMiddleware, HearthError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Arming state of the security domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Home,
    Away,
    Night,
    Vacation,
    Disarmed,
}

impl SecurityMode {
    /// Parse the wire representation, rejecting anything outside the
    /// closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home" => Some(Self::Home),
            "away" => Some(Self::Away),
            "night" => Some(Self::Night),
            "vacation" => Some(Self::Vacation),
            "disarmed" => Some(Self::Disarmed),
            _ => None,
        }
    }
}

/// Security domain subsystem.
pub struct SecurityDomain {
    mode: RwLock<SecurityMode>,
    bus: Arc<EventBus>,
    errors: Arc<ErrorMiddleware>,
}

impl SecurityDomain {
    /// Construct starting in `disarmed`.
    pub fn new(bus: Arc<EventBus>, errors: Arc<ErrorMiddleware>) -> Self {
        Self {
            mode: RwLock::new(SecurityMode::Disarmed),
            bus,
            errors,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> SecurityMode {
        *self.mode.read()
    }

    /// Set the mode, rejecting anything outside the closed set and
    /// publishing `security-mode-changed` only on an actual transition.
    pub fn set_mode(&self, raw: &str) -> Result<SecurityMode, HearthError> {
        let next = SecurityMode::parse(raw).ok_or_else(|| HearthError::Validation(format!("unknown security mode: {raw}")))?;
        let changed = {
            let mut mode = self.mode.write();
            let changed = *mode != next;
            *mode = next;
            changed
        };
        if changed {
            let failures = self.bus.publish(Topic::SecurityModeChanged, serde_json::json!({ "mode": next }));
            bus::record_delivery_failures(&self.errors, failures);
        }
        Ok(next)
    }
}

#[async_trait]
impl Subsystem for SecurityDomain {
    fn id(&self) -> &'static str {
        "security"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_documented_mode() {
        for raw in ["home", "away", "night", "vacation", "disarmed"] {
            assert!(SecurityMode::parse(raw).is_some());
        }
        assert!(SecurityMode::parse("invalid-mode").is_none());
    }

    #[test]
    fn rejects_unknown_mode_string() {
        let domain = SecurityDomain::new(Arc::new(EventBus::new()), Arc::new(ErrorMiddleware::new()));
        assert!(domain.set_mode("invalid-mode").is_err());
        assert_eq!(domain.mode(), SecurityMode::Disarmed);
    }

    #[test]
    fn valid_mode_transition_succeeds_and_publishes() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(
            Topic::SecurityModeChanged,
            "test",
            Arc::new(move |_, payload: &serde_json::Value| {
                seen2.lock().push(payload.clone());
                Ok(())
            }),
        );
        let domain = SecurityDomain::new(bus, Arc::new(ErrorMiddleware::new()));
        domain.set_mode("home").unwrap();
        assert_eq!(domain.mode(), SecurityMode::Home);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn setting_the_same_mode_again_does_not_republish() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(parking_lot::Mutex::new(0));
        let count2 = count.clone();
        bus.subscribe(
            Topic::SecurityModeChanged,
            "test",
            Arc::new(move |_, _: &serde_json::Value| {
                *count2.lock() += 1;
                Ok(())
            }),
        );
        let domain = SecurityDomain::new(bus, Arc::new(ErrorMiddleware::new()));
        domain.set_mode("home").unwrap();
        domain.set_mode("home").unwrap();
        assert_eq!(*count.lock(), 1);
    }
}
