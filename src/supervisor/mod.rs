//! Supervisor: owns the lifecycle of every feature module and doubles as the
//! event bus host. Modules are queried for capability presence
//! (`Initializable`, `Destroyable`) rather than dispatched to by method
//! name — the gateway wires routes for the concrete modules it holds
//! directly, since only `domain::energy` and `domain::security` exist as
//! worked subsystems here. Every owned timer is registered through the
//! injectable [`Clock`] so `destroy_all` can assert none remain scheduled.

pub mod clock;

pub use clock::{Clock, SystemClock, TimerHandle};

use crate::bus::{EventBus, Topic};
use crate::error::{ErrorMiddleware, HearthError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle state of one loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleState {
    Ready,
    Failed,
}

/// Capability every loadable module implements.
#[async_trait]
pub trait Initializable: Send + Sync {
    /// Stable module id, used as the HTTP route prefix and in summaries.
    fn module_id(&self) -> &'static str;
    /// One-time setup. A failure marks the module FAILED but never blocks
    /// the remaining modules in the load order.
    async fn initialize(&self) -> Result<(), HearthError>;
}

/// Capability for modules that must release resources on shutdown.
#[async_trait]
pub trait Destroyable: Send + Sync {
    /// Release every owned resource. Must tolerate being called on a
    /// module whose `initialize` never ran or failed.
    async fn destroy(&self) -> Result<(), HearthError>;
}

/// Adapts a [`crate::domain::Subsystem`] onto the supervisor's
/// `Initializable`/`Destroyable` capability traits, so domain modules stay
/// decoupled from the supervisor's own module-loading vocabulary.
pub struct SubsystemModule<T>(pub Arc<T>);

#[async_trait]
impl<T: crate::domain::Subsystem + 'static> Initializable for SubsystemModule<T> {
    fn module_id(&self) -> &'static str {
        self.0.id()
    }

    async fn initialize(&self) -> Result<(), HearthError> {
        self.0.initialize().await
    }
}

#[async_trait]
impl<T: crate::domain::Subsystem + 'static> Destroyable for SubsystemModule<T> {
    async fn destroy(&self) -> Result<(), HearthError> {
        self.0.destroy().await
    }
}

/// A loaded module, queried for capability presence rather than dispatched
/// to by name (§9's re-architecture note for the source's mixed
/// "has this method?" checks).
pub struct LoadedModule {
    pub id: &'static str,
    pub state: ModuleState,
    init: Arc<dyn Initializable>,
    destroy: Option<Arc<dyn Destroyable>>,
}

/// Result of `load_all`.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub total: usize,
    pub ready: usize,
    pub failed: Vec<String>,
}

/// Summary returned by `get_summary`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SupervisorSummary {
    pub module_count: usize,
    pub ready: usize,
    pub failed: usize,
    pub uptime_seconds: u64,
}

/// Module host and event bus owner.
pub struct Supervisor {
    bus: Arc<EventBus>,
    errors: Arc<ErrorMiddleware>,
    clock: Arc<dyn Clock>,
    modules: parking_lot::RwLock<Vec<LoadedModule>>,
    started_at: std::time::Instant,
    load_completed: std::sync::atomic::AtomicBool,
    uptime_origin_millis: AtomicU64,
}

impl Supervisor {
    /// Construct a supervisor over `bus`, sharing `errors` for failure
    /// reporting and `clock` for timer ownership.
    pub fn new(bus: Arc<EventBus>, errors: Arc<ErrorMiddleware>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            errors,
            clock,
            modules: parking_lot::RwLock::new(Vec::new()),
            started_at: std::time::Instant::now(),
            load_completed: std::sync::atomic::AtomicBool::new(false),
            uptime_origin_millis: AtomicU64::new(0),
        }
    }

    /// Shared event bus handle.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Shared clock handle, for modules that need to register timers.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Load every declared module in dependency order (leaves first, per
    /// the manifest order the caller provides). A module's `initialize`
    /// failure is recorded and does not block its peers.
    pub async fn load_all(
        &self,
        declared: Vec<(Arc<dyn Initializable>, Option<Arc<dyn Destroyable>>)>,
    ) -> LoadReport {
        let mut loaded = Vec::new();
        let mut failed = Vec::new();

        for (init, destroy) in declared {
            let id = init.module_id();
            let state = match init.initialize().await {
                Ok(()) => ModuleState::Ready,
                Err(e) => {
                    self.errors.record_error(id, &e);
                    failed.push(id.to_string());
                    ModuleState::Failed
                }
            };
            loaded.push(LoadedModule {
                id,
                state,
                init,
                destroy,
            });
        }

        let total = loaded.len();
        let ready = loaded.iter().filter(|m| m.state == ModuleState::Ready).count();
        *self.modules.write() = loaded;
        self.load_completed.store(true, Ordering::SeqCst);

        LoadReport {
            total,
            ready,
            failed,
        }
    }

    /// Whether `load_all` has completed — the readiness contract is
    /// separate from liveness: a freshly started process is alive
    /// (`/health` 200) before it is ready (`/ready` 200).
    pub fn is_ready(&self) -> bool {
        self.load_completed.load(Ordering::SeqCst)
    }

    /// Destroy every module in reverse load order, tolerating individual
    /// failures. References are dropped regardless of outcome; the clock
    /// assertion that no owned timer remains is the caller's
    /// responsibility post-return.
    pub async fn destroy_all(&self) {
        let failures = self.bus.publish(Topic::Shutdown, serde_json::json!({}));
        crate::bus::record_delivery_failures(&self.errors, failures);
        let mut modules = self.modules.write();
        for module in modules.iter().rev() {
            if let Some(destroy) = &module.destroy {
                if let Err(e) = destroy.destroy().await {
                    self.errors.record_error(module.id, &e);
                }
            }
        }
        modules.clear();
        self.clock.cancel_all();
    }

    /// Current lifecycle summary.
    pub fn get_summary(&self) -> SupervisorSummary {
        let modules = self.modules.read();
        let ready = modules.iter().filter(|m| m.state == ModuleState::Ready).count();
        let failed = modules.len() - ready;
        SupervisorSummary {
            module_count: modules.len(),
            ready,
            failed,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}
