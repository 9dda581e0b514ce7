//! Error taxonomy and the process-wide error middleware.
//!
//! Mirrors the split the rest of the crate leans on throughout: `error::`
//! carries the typed error enum and the classification/dedup/storm logic
//! that turns raw errors into [`ErrorEntry`] records, while [`crate::resilience`]
//! carries the retry/circuit-breaker/timeout mechanics the middleware
//! delegates to.

pub mod middleware;

pub use middleware::{ErrorMiddleware, ErrorSeverity};

use thiserror::Error;

/// Result type used across the crate.
pub type HearthResult<T> = Result<T, HearthError>;

/// Errors surfaced across subsystem boundaries.
///
/// Kinds map onto the taxonomy in the specification's error-handling design:
/// validation errors are boundary refusals (never logged as errors),
/// transient/device/logic errors are recovered or degraded locally, and
/// fatal errors mark a subsystem FAILED without taking down the process.
#[derive(Error, Debug, Clone)]
pub enum HearthError {
    /// Caller-supplied input failed validation. Surfaced directly to the
    /// caller (HTTP 400, rejected socket event, typed refusal); never
    /// recorded in error history.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity (zone, automation, device) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity the caller tried to create already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Outbound call exceeded its bounded timeout.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// Configured timeout that was exceeded.
        duration_ms: u64,
    },

    /// The external device manager / actuator failed.
    #[error("device fault: {device_id} - {message}")]
    DeviceFault {
        /// Device identifier.
        device_id: String,
        /// Failure detail.
        message: String,
    },

    /// A dependency is temporarily unavailable (rate limited, circuit open).
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The circuit breaker for this operation is open.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// A user-programmed automation expression is malformed or unsafe.
    #[error("logic fault: {0}")]
    LogicFault(String),

    /// Unexpected internal error; subsystem-fatal if raised during init.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HearthError {
    /// Whether this error kind is safe to retry automatically.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::DeviceFault { .. }
                | Self::ResourceUnavailable(_)
                | Self::CircuitOpen(_)
        )
    }

    /// A hint the severity classifier may honour instead of running the
    /// regex cascade (e.g. validation errors are never logged as errors).
    pub fn hint_severity(&self) -> Option<ErrorSeverity> {
        match self {
            Self::Validation(_) => None,
            Self::DeviceFault { .. } => Some(ErrorSeverity::High),
            Self::LogicFault(_) => Some(ErrorSeverity::High),
            Self::Internal(_) => Some(ErrorSeverity::Critical),
            _ => None,
        }
    }
}
