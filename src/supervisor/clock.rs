//! Injectable timer ownership, replacing the wrapped `setTimeout`/
//! `setInterval` leak-detection pattern with a `Clock` trait the test
//! harness can observe directly: every owned timer is registered here, and
//! `destroy_all` asserts the live set is empty afterwards.
//!
//! The clock owns the periodic work itself, not just a bookkeeping entry
//! for it: a caller hands `schedule_interval` the closure to run on every
//! tick, and `cancel`/`cancel_all` abort the task actually running that
//! closure. A registry that only tracked a decoy loop while the real work
//! ran in a separate untracked `tokio::spawn` would make `cancel_all`
//! (and the `active_timer_count() == 0` shutdown assertion it backs) a
//! false signal.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Opaque handle to one registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// The periodic work a timer runs on every tick. Takes no arguments and
/// returns a boxed future so it can cross the `dyn Clock` object-safety
/// boundary; callers close over whatever state the work needs.
pub type IntervalWork = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A no-op work closure, for callers (tests) that only care about the
/// registry bookkeeping and never intend for the timer to fire for real.
pub fn noop_work() -> IntervalWork {
    Box::new(|| Box::pin(async {}))
}

/// Timer registry a subsystem uses to declare its periodic work, so
/// `destroy_all` can guarantee clearance.
pub trait Clock: Send + Sync {
    /// Register periodic work owned by `owner`, run every `period` by the
    /// clock itself, returning a handle used to cancel it individually.
    fn schedule_interval(&self, owner: &str, period: Duration, work: IntervalWork) -> TimerHandle;
    /// Cancel one timer, aborting its running task if the clock spawned one.
    fn cancel(&self, handle: TimerHandle);
    /// Cancel every currently registered timer.
    fn cancel_all(&self);
    /// Number of timers currently registered (test/diagnostic surface).
    fn active_timer_count(&self) -> usize;
}

struct TimerEntry {
    #[allow(dead_code)]
    owner: String,
    #[allow(dead_code)]
    period: Duration,
    task: tokio::task::JoinHandle<()>,
}

/// Production clock: registers a real background tick loop per timer, and
/// that loop runs the caller's actual work closure — not a decoy — so the
/// registry reflects work genuinely in flight.
pub struct SystemClock {
    next_id: AtomicU64,
    timers: DashMap<u64, TimerEntry>,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Construct an empty clock.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            timers: DashMap::new(),
        }
    }
}

impl Clock for SystemClock {
    fn schedule_interval(&self, owner: &str, period: Duration, work: IntervalWork) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                work().await;
            }
        });
        self.timers.insert(
            id,
            TimerEntry {
                owner: owner.to_string(),
                period,
                task,
            },
        );
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some((_, entry)) = self.timers.remove(&handle.0) {
            entry.task.abort();
        }
    }

    fn cancel_all(&self) {
        for entry in self.timers.iter() {
            entry.task.abort();
        }
        self.timers.clear();
    }

    fn active_timer_count(&self) -> usize {
        self.timers.len()
    }
}

/// Test clock: pure bookkeeping, no real task is spawned. Lets tests assert
/// on the live timer set without depending on scheduler timing; the work
/// closure is accepted (to satisfy the trait) but intentionally never run.
#[derive(Default)]
pub struct ManualClock {
    next_id: AtomicU64,
    timers: DashMap<u64, (String, Duration)>,
}

impl ManualClock {
    /// Construct an empty clock.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            timers: DashMap::new(),
        }
    }
}

impl Clock for ManualClock {
    fn schedule_interval(&self, owner: &str, period: Duration, _work: IntervalWork) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.timers.insert(id, (owner.to_string(), period));
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.timers.remove(&handle.0);
    }

    fn cancel_all(&self) {
        self.timers.clear();
    }

    fn active_timer_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_tracks_registration_and_cancellation() {
        let clock = ManualClock::new();
        let h1 = clock.schedule_interval("pid", Duration::from_secs(30), noop_work());
        let _h2 = clock.schedule_interval("energy", Duration::from_secs(10), noop_work());
        assert_eq!(clock.active_timer_count(), 2);
        clock.cancel(h1);
        assert_eq!(clock.active_timer_count(), 1);
        clock.cancel_all();
        assert_eq!(clock.active_timer_count(), 0);
    }

    #[tokio::test]
    async fn system_clock_cancel_all_stops_the_real_work() {
        let clock = SystemClock::new();
        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticks2 = ticks.clone();
        clock.schedule_interval(
            "counter",
            Duration::from_millis(5),
            Box::new(move || {
                let ticks = ticks2.clone();
                Box::pin(async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ticks.load(Ordering::SeqCst) > 0);

        clock.cancel_all();
        assert_eq!(clock.active_timer_count(), 0);
        let observed_after_cancel = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), observed_after_cancel);
    }
}
