//! Energy domain subsystem: a bounded consumption sample ring plus
//! tariff-based cost analytics. The tariff is read from configuration (or
//! the settings store override), never hard-coded.

use super::Subsystem;
use crate::error::HearthError;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

const SAMPLE_CAPACITY: usize = 1000;

/// One consumption reading for a source (a zone, a circuit, the whole
/// household).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionSample {
    pub timestamp: u64,
    pub source_id: String,
    pub value_kwh: f64,
    pub derived: Option<serde_json::Value>,
}

/// Current-snapshot view across every sampled source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergySnapshot {
    pub total_kwh_today: f64,
    pub sample_count: usize,
}

/// Snapshot enriched with a cost estimate at the current tariff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyAnalytics {
    pub total_kwh_today: f64,
    pub estimated_cost_sek: f64,
    pub tariff_sek_per_kwh: f64,
}

/// Energy domain subsystem.
pub struct EnergyDomain {
    samples: Mutex<VecDeque<ConsumptionSample>>,
    settings: Arc<dyn SettingsStore>,
    default_tariff_sek_per_kwh: f64,
}

const TARIFF_SETTINGS_KEY: &str = "energy.tariff_sek_per_kwh";

impl EnergyDomain {
    /// Construct with a configured default tariff; the settings store may
    /// override it at runtime without a restart.
    pub fn new(settings: Arc<dyn SettingsStore>, default_tariff_sek_per_kwh: f64) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(SAMPLE_CAPACITY)),
            settings,
            default_tariff_sek_per_kwh,
        }
    }

    /// Record a new consumption sample, evicting the oldest past capacity.
    pub fn record_sample(&self, sample: ConsumptionSample) {
        let mut samples = self.samples.lock();
        if samples.len() >= SAMPLE_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Current tariff: settings-store override if present, else the
    /// configured default.
    pub fn tariff_sek_per_kwh(&self) -> f64 {
        self.settings
            .get(TARIFF_SETTINGS_KEY)
            .and_then(|v| v.as_f64())
            .unwrap_or(self.default_tariff_sek_per_kwh)
    }

    /// Override the tariff at runtime.
    pub fn set_tariff_sek_per_kwh(&self, value: f64) {
        self.settings.set(TARIFF_SETTINGS_KEY, serde_json::json!(value));
    }

    /// Current snapshot summing every retained sample.
    pub fn snapshot(&self) -> EnergySnapshot {
        let samples = self.samples.lock();
        EnergySnapshot {
            total_kwh_today: samples.iter().map(|s| s.value_kwh).sum(),
            sample_count: samples.len(),
        }
    }

    /// Snapshot plus a cost estimate at the current tariff.
    pub fn analytics(&self) -> EnergyAnalytics {
        let snapshot = self.snapshot();
        let tariff = self.tariff_sek_per_kwh();
        EnergyAnalytics {
            total_kwh_today: snapshot.total_kwh_today,
            estimated_cost_sek: snapshot.total_kwh_today * tariff,
            tariff_sek_per_kwh: tariff,
        }
    }
}

#[async_trait]
impl Subsystem for EnergyDomain {
    fn id(&self) -> &'static str {
        "energy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::InMemorySettingsStore;

    fn domain() -> EnergyDomain {
        EnergyDomain::new(Arc::new(InMemorySettingsStore::new()), 1.50)
    }

    fn sample(source: &str, kwh: f64) -> ConsumptionSample {
        ConsumptionSample {
            timestamp: 0,
            source_id: source.to_string(),
            value_kwh: kwh,
            derived: None,
        }
    }

    #[test]
    fn snapshot_sums_recorded_samples() {
        let d = domain();
        d.record_sample(sample("zone-1", 1.5));
        d.record_sample(sample("zone-2", 2.5));
        assert_eq!(d.snapshot().total_kwh_today, 4.0);
    }

    #[test]
    fn sample_ring_bounded_to_1000() {
        let d = domain();
        for _ in 0..1500 {
            d.record_sample(sample("zone-1", 1.0));
        }
        assert_eq!(d.snapshot().sample_count, 1000);
    }

    #[test]
    fn analytics_uses_configured_default_tariff() {
        let d = domain();
        d.record_sample(sample("zone-1", 2.0));
        let analytics = d.analytics();
        assert_eq!(analytics.tariff_sek_per_kwh, 1.50);
        assert_eq!(analytics.estimated_cost_sek, 3.0);
    }

    #[test]
    fn settings_store_override_takes_precedence_over_default() {
        let d = domain();
        d.set_tariff_sek_per_kwh(2.0);
        d.record_sample(sample("zone-1", 2.0));
        assert_eq!(d.analytics().estimated_cost_sek, 4.0);
    }
}
