//! Process-wide error classification, deduplication and mitigation.
//!
//! Constructed once at startup and carried in the app context — the target
//! rendition of the source's "singleton with mutable module-scope state"
//! (see `DESIGN.md`). Classification, dedup and storm detection live here;
//! the retry/circuit-breaker/timeout/fallback mechanics it wraps live in
//! [`crate::resilience`].

use crate::error::HearthError;
use crate::resilience::{circuit_breaker::CircuitBreaker, retry, timeout};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

const HISTORY_CAPACITY: usize = 500;
const DEDUP_WINDOW: Duration = Duration::from_secs(5);
const STORM_WINDOW: Duration = Duration::from_secs(60);
const STORM_THRESHOLD: usize = 10;

/// Severity bucket assigned to a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    /// Crash-grade, process-level concern.
    Critical,
    /// Device/actuator failure.
    High,
    /// Timeout, validation, not-found.
    Medium,
    /// Connection refused, rate-limit.
    Info,
    /// Everything else.
    Low,
}

/// One recorded error, bounded to the last 500 (ring buffer, newest wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Unique id for this entry.
    pub id: String,
    /// Millis since epoch.
    pub timestamp: u64,
    /// Subsystem that raised the error.
    pub system: String,
    /// Error message.
    pub message: String,
    /// Assigned severity.
    pub severity: ErrorSeverity,
    /// Free-form context.
    pub context: serde_json::Value,
}

// First-match-wins regex cascade, descending severity.
static HIGH_PATTERNS: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(["(?i)device", "(?i)actuator"]).expect("valid regex set"));
static CRITICAL_PATTERNS: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(["(?i)crash", "(?i)fatal", "(?i)panic"]).expect("valid regex set"));
static MEDIUM_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(["(?i)timeout", "(?i)validation", "(?i)not.?found"]).expect("valid regex set")
});
static INFO_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(["(?i)connection refused", "(?i)rate.?limit"]).expect("valid regex set")
});

fn classify(message: &str) -> ErrorSeverity {
    if CRITICAL_PATTERNS.is_match(message) {
        ErrorSeverity::Critical
    } else if HIGH_PATTERNS.is_match(message) {
        ErrorSeverity::High
    } else if MEDIUM_PATTERNS.is_match(message) {
        ErrorSeverity::Medium
    } else if INFO_PATTERNS.is_match(message) {
        ErrorSeverity::Info
    } else {
        ErrorSeverity::Low
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of recording an error: the stored entry (`None` if deduplicated)
/// and whether this record pushed the system over the error-storm threshold.
pub struct RecordOutcome {
    /// `None` when the error was suppressed as a duplicate.
    pub entry: Option<ErrorEntry>,
    /// `true` the first time the storm threshold is crossed within the
    /// current window for this system.
    pub storm: bool,
}

struct DedupKey {
    system: String,
    message: String,
    seen_at: Instant,
}

/// Process-wide error middleware: classification, dedup, storm detection and
/// mitigation primitives.
pub struct ErrorMiddleware {
    history: Mutex<VecDeque<ErrorEntry>>,
    recent: Mutex<Vec<DedupKey>>,
    per_system_times: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for ErrorMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorMiddleware {
    /// Construct an empty middleware instance.
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            recent: Mutex::new(Vec::new()),
            per_system_times: Mutex::new(HashMap::new()),
        }
    }

    /// Classify, deduplicate and record an error from `system`.
    pub fn record(
        &self,
        system: &str,
        message: &str,
        hint: Option<ErrorSeverity>,
        context: serde_json::Value,
    ) -> RecordOutcome {
        {
            let mut recent = self.recent.lock();
            recent.retain(|k| k.seen_at.elapsed() < DEDUP_WINDOW);
            if recent
                .iter()
                .any(|k| k.system == system && k.message == message)
            {
                return RecordOutcome {
                    entry: None,
                    storm: false,
                };
            }
            recent.push(DedupKey {
                system: system.to_string(),
                message: message.to_string(),
                seen_at: Instant::now(),
            });
        }

        let severity = hint.unwrap_or_else(|| classify(message));
        let entry = ErrorEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            system: system.to_string(),
            message: message.to_string(),
            severity,
            context,
        };

        {
            let mut history = self.history.lock();
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(entry.clone());
        }

        let storm = {
            let mut times = self.per_system_times.lock();
            let bucket = times.entry(system.to_string()).or_default();
            bucket.push_back(Instant::now());
            while let Some(front) = bucket.front() {
                if front.elapsed() > STORM_WINDOW {
                    bucket.pop_front();
                } else {
                    break;
                }
            }
            bucket.len() == STORM_THRESHOLD
        };

        RecordOutcome {
            entry: Some(entry),
            storm,
        }
    }

    /// Record a [`HearthError`], honouring its severity hint when present.
    pub fn record_error(&self, system: &str, error: &HearthError) -> RecordOutcome {
        if matches!(error, HearthError::Validation(_)) {
            return RecordOutcome {
                entry: None,
                storm: false,
            };
        }
        self.record(
            system,
            &error.to_string(),
            error.hint_severity(),
            serde_json::json!({}),
        )
    }

    /// Snapshot of the current error history, newest last.
    pub fn history(&self) -> Vec<ErrorEntry> {
        self.history.lock().iter().cloned().collect()
    }

    /// Number of entries currently retained.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Retry `f` with exponential backoff, delegating to [`retry::retry_with_backoff`].
    pub async fn retry<F, Fut, T>(
        &self,
        attempts: u32,
        base_delay_ms: u64,
        f: F,
    ) -> Result<T, HearthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HearthError>>,
    {
        retry::retry_with_backoff(attempts, base_delay_ms, f).await
    }

    /// Run `primary`; on failure run `backup`. Propagates `backup`'s error
    /// if both fail.
    pub async fn fallback<F1, F2, Fut1, Fut2, T>(
        &self,
        primary: F1,
        backup: F2,
    ) -> Result<T, HearthError>
    where
        F1: FnOnce() -> Fut1,
        F2: FnOnce() -> Fut2,
        Fut1: Future<Output = Result<T, HearthError>>,
        Fut2: Future<Output = Result<T, HearthError>>,
    {
        match primary().await {
            Ok(v) => Ok(v),
            Err(_) => backup().await,
        }
    }

    /// Execute `f` through `breaker`.
    pub async fn circuit_breaker<F, Fut, T>(
        &self,
        breaker: &CircuitBreaker,
        f: F,
    ) -> Result<T, HearthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, HearthError>>,
    {
        breaker.execute(f).await
    }

    /// Run `f`, returning `fallback_value` instead of propagating any error.
    pub async fn graceful_degrade<F, Fut, T>(&self, f: F, fallback_value: T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, HearthError>>,
    {
        match f().await {
            Ok(v) => v,
            Err(_) => fallback_value,
        }
    }

    /// Run `f` with a bounded timeout, matching §5's 3s default for
    /// outbound device calls when no explicit duration is requested.
    pub async fn with_timeout<F, T>(&self, duration: Duration, f: F) -> Result<T, HearthError>
    where
        F: Future<Output = Result<T, HearthError>>,
    {
        timeout::with_timeout(duration, f).await
    }

    /// Record on error and rethrow — semantic-preserving wrapper.
    pub fn wrap<T>(&self, system: &str, result: Result<T, HearthError>) -> Result<T, HearthError> {
        if let Err(ref e) = result {
            self.record_error(system, e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_in_descending_severity_order() {
        assert_eq!(classify("kernel panic detected"), ErrorSeverity::Critical);
        assert_eq!(classify("device write failed"), ErrorSeverity::High);
        assert_eq!(classify("request timeout"), ErrorSeverity::Medium);
        assert_eq!(classify("connection refused"), ErrorSeverity::Info);
        assert_eq!(classify("something odd"), ErrorSeverity::Low);
    }

    #[test]
    fn dedup_suppresses_identical_entry_within_window() {
        let mw = ErrorMiddleware::new();
        let first = mw.record("pid", "sensor stale", None, serde_json::json!({}));
        assert!(first.entry.is_some());
        let second = mw.record("pid", "sensor stale", None, serde_json::json!({}));
        assert!(second.entry.is_none());
        assert_eq!(mw.history_len(), 1);
    }

    #[test]
    fn history_is_bounded_to_500() {
        let mw = ErrorMiddleware::new();
        for i in 0..600 {
            mw.record("sys", &format!("unique message {i}"), None, serde_json::json!({}));
        }
        assert_eq!(mw.history_len(), 500);
    }

    #[test]
    fn storm_fires_exactly_once_at_threshold() {
        let mw = ErrorMiddleware::new();
        let mut storms = 0;
        for i in 0..12 {
            let outcome = mw.record("gateway", &format!("timeout #{i}"), None, serde_json::json!({}));
            if outcome.storm {
                storms += 1;
            }
        }
        assert_eq!(storms, 1);
    }

    #[test]
    fn validation_errors_are_never_recorded() {
        let mw = ErrorMiddleware::new();
        let outcome = mw.record_error("gateway", &HearthError::Validation("bad id".into()));
        assert!(outcome.entry.is_none());
        assert_eq!(mw.history_len(), 0);
    }

    #[tokio::test]
    async fn wrap_records_and_rethrows() {
        let mw = ErrorMiddleware::new();
        let result: Result<(), HearthError> = Err(HearthError::DeviceFault {
            device_id: "d1".into(),
            message: "write failed".into(),
        });
        let rewrapped = mw.wrap("device-manager", result);
        assert!(rewrapped.is_err());
        assert_eq!(mw.history_len(), 1);
    }
}
