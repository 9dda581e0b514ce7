//! Shared template for the dozens of lighter domain subsystems (energy,
//! security, and — outside this crate's scope — pool chemistry, irrigation,
//! HVAC, and the rest). Every one of them is schedule + sampler + actuator +
//! guard: a periodic tick samples or schedules, an optional actuator call
//! goes through the device cache, and a guard validates before any mutation.
//! `energy` and `security` are the two worked implementations; any further
//! domain follows the same shape.

pub mod energy;
pub mod security;

use crate::error::HearthError;
use async_trait::async_trait;

/// Common lifecycle every domain subsystem implements, mirroring the
/// supervisor's `initialize`/`destroy` contract (§4.1) at the per-module
/// level.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Stable module id used to prefix routes and identify the module in
    /// supervisor summaries.
    fn id(&self) -> &'static str;

    /// One-time setup. Failure marks the module FAILED without blocking
    /// peers.
    async fn initialize(&self) -> Result<(), HearthError> {
        Ok(())
    }

    /// Release any owned resources. Must be safe to call even if
    /// `initialize` never ran or already failed.
    async fn destroy(&self) -> Result<(), HearthError> {
        Ok(())
    }
}
