//! Pluggable key/value settings store (§6). The core depends only on this
//! trait; a real deployment backs it with a persistent engine out of scope
//! for this crate.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Settings store interface: opaque values, round-tripped unchanged, no
/// transaction semantics.
pub trait SettingsStore: Send + Sync {
    /// Fetch the value stored at `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;
    /// Store `value` at `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value);
    /// List every key currently stored.
    fn keys(&self) -> Vec<String>;
}

/// In-memory settings store used in tests and as the default until a
/// persistent backend is wired in.
#[derive(Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemorySettingsStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
    }

    fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }
}
