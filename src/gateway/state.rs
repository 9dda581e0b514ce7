//! Shared application state handed to every gateway handler.

use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::device::DeviceCache;
use crate::domain::energy::EnergyDomain;
use crate::domain::security::SecurityDomain;
use crate::error::ErrorMiddleware;
use crate::notifications::NotificationCenter;
use crate::perf::PerfMonitor;
use crate::pid::HeatingController;
use crate::resilience::rate_limit::TokenBucket;
use crate::rules::AutomationEngine;
use crate::supervisor::Supervisor;
use std::sync::Arc;

/// Everything a route handler or middleware layer might need, cloned
/// cheaply (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub devices: Arc<DeviceCache>,
    pub pid: Arc<HeatingController>,
    pub rules: Arc<AutomationEngine>,
    pub energy: Arc<EnergyDomain>,
    pub security: Arc<SecurityDomain>,
    pub perf: Arc<PerfMonitor>,
    pub errors: Arc<ErrorMiddleware>,
    pub notifications: Arc<NotificationCenter>,
    pub bus: Arc<EventBus>,
    pub supervisor: Arc<Supervisor>,
    pub rate_limiter: Arc<TokenBucket>,
    pub started_at: std::time::Instant,
}
