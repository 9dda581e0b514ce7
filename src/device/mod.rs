//! Device manager adapter: the single mutable shared resource in the system.
//!
//! Replaces the source's "shared mutable maps across subsystems" with a
//! read-through cache that owns the cache and serializes mutations per
//! device id (§9's re-architecture note), fronting a pluggable
//! [`DeviceManager`] implementation.

use crate::error::HearthError;
use crate::resilience::timeout::{with_timeout, DEFAULT_DEVICE_CALL_TIMEOUT};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A controllable endpoint exposed by the external device manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// Opaque device id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Zone this device belongs to.
    pub zone_id: String,
    /// Device class (light/thermostat/sensor/socket/...).
    pub class: String,
    /// Supported capability names.
    pub capabilities: HashSet<String>,
    /// Current value per capability.
    pub capability_values: HashMap<String, serde_json::Value>,
}

impl Device {
    /// Validate the invariant that every capability named in
    /// `capability_values` is present in `capabilities`.
    pub fn validate(&self) -> Result<(), HearthError> {
        for key in self.capability_values.keys() {
            if !self.capabilities.contains(key) {
                return Err(HearthError::Validation(format!(
                    "capability value '{key}' not declared in capabilities for device {}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// A logical room grouping, read-only from the core's viewpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    /// Opaque zone id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Icon identifier for the dashboard.
    pub icon: String,
}

/// The external device-control surface the home-automation SDK exposes.
/// Every call is cancellable and must respect a timeout; implementers map
/// their own errors onto [`HearthError`].
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// List every known device.
    async fn get_devices(&self) -> Result<HashMap<String, Device>, HearthError>;
    /// List every known zone.
    async fn get_zones(&self) -> Result<HashMap<String, Zone>, HearthError>;
    /// Read one capability value for a device.
    async fn get_device_capability(
        &self,
        device_id: &str,
        capability: &str,
    ) -> Result<serde_json::Value, HearthError>;
    /// Write one capability value for a device.
    async fn set_device_capability(
        &self,
        device_id: &str,
        capability: &str,
        value: serde_json::Value,
    ) -> Result<(), HearthError>;
    /// Trigger a pre-defined automation flow/scene by id.
    async fn trigger_flow(&self, flow_id: &str) -> Result<(), HearthError>;
}

/// In-memory device manager used for demo data and tests.
#[derive(Default)]
pub struct InMemoryDeviceManager {
    devices: DashMap<String, Device>,
    zones: DashMap<String, Zone>,
}

impl InMemoryDeviceManager {
    /// Construct an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a device (discovery/resync — never deleted by the core).
    pub fn upsert_device(&self, device: Device) -> Result<(), HearthError> {
        device.validate()?;
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    /// Seed or replace a zone.
    pub fn upsert_zone(&self, zone: Zone) {
        self.zones.insert(zone.id.clone(), zone);
    }
}

#[async_trait]
impl DeviceManager for InMemoryDeviceManager {
    async fn get_devices(&self) -> Result<HashMap<String, Device>, HearthError> {
        Ok(self.devices.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
    }

    async fn get_zones(&self) -> Result<HashMap<String, Zone>, HearthError> {
        Ok(self.zones.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
    }

    async fn get_device_capability(
        &self,
        device_id: &str,
        capability: &str,
    ) -> Result<serde_json::Value, HearthError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| HearthError::NotFound(format!("device {device_id}")))?;
        device
            .capability_values
            .get(capability)
            .cloned()
            .ok_or_else(|| HearthError::NotFound(format!("capability {capability} on {device_id}")))
    }

    async fn set_device_capability(
        &self,
        device_id: &str,
        capability: &str,
        value: serde_json::Value,
    ) -> Result<(), HearthError> {
        let mut device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| HearthError::NotFound(format!("device {device_id}")))?;
        if !device.capabilities.contains(capability) {
            return Err(HearthError::Validation(format!(
                "device {device_id} does not support capability {capability}"
            )));
        }
        device.capability_values.insert(capability.to_string(), value);
        Ok(())
    }

    async fn trigger_flow(&self, _flow_id: &str) -> Result<(), HearthError> {
        Ok(())
    }
}

/// Read-through cache adapter in front of a [`DeviceManager`]. Serializes
/// mutations per device id via a per-device lock; callers assume no
/// cross-device ordering. Every call runs under the default outbound
/// timeout.
pub struct DeviceCache {
    backend: Arc<dyn DeviceManager>,
    device_locks: DashMap<String, Arc<Mutex<()>>>,
    cache: DashMap<String, Device>,
}

impl DeviceCache {
    /// Wrap `backend` with a read-through cache.
    pub fn new(backend: Arc<dyn DeviceManager>) -> Self {
        Self {
            backend,
            device_locks: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    fn lock_for(&self, device_id: &str) -> Arc<Mutex<()>> {
        self.device_locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Refresh the local cache from the backend.
    pub async fn refresh(&self) -> Result<(), HearthError> {
        let devices = with_timeout(DEFAULT_DEVICE_CALL_TIMEOUT, self.backend.get_devices()).await?;
        self.cache.clear();
        for (id, device) in devices {
            self.cache.insert(id, device);
        }
        Ok(())
    }

    /// All cached devices (observation — never blocks on the backend).
    pub fn devices(&self) -> HashMap<String, Device> {
        self.cache.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Zones, fetched directly (read-only, not cached).
    pub async fn zones(&self) -> Result<HashMap<String, Zone>, HearthError> {
        with_timeout(DEFAULT_DEVICE_CALL_TIMEOUT, self.backend.get_zones()).await
    }

    /// Set a capability, serialized per device id, then refreshes that
    /// device's cached entry.
    pub async fn set_capability(
        &self,
        device_id: &str,
        capability: &str,
        value: serde_json::Value,
    ) -> Result<(), HearthError> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;
        with_timeout(
            DEFAULT_DEVICE_CALL_TIMEOUT,
            self.backend.set_device_capability(device_id, capability, value.clone()),
        )
        .await?;
        if let Some(mut device) = self.cache.get_mut(device_id) {
            device.capability_values.insert(capability.to_string(), value);
        }
        Ok(())
    }

    /// Read a capability's current value via the backend.
    pub async fn get_capability(
        &self,
        device_id: &str,
        capability: &str,
    ) -> Result<serde_json::Value, HearthError> {
        with_timeout(
            DEFAULT_DEVICE_CALL_TIMEOUT,
            self.backend.get_device_capability(device_id, capability),
        )
        .await
    }

    /// Trigger a flow/scene by id.
    pub async fn trigger_flow(&self, flow_id: &str) -> Result<(), HearthError> {
        with_timeout(DEFAULT_DEVICE_CALL_TIMEOUT, self.backend.trigger_flow(flow_id)).await
    }
}
