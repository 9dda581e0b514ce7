//! Performance monitor: per-endpoint counters, a bounded latency buffer, and
//! host gauges, exposed as both a structured snapshot and Prometheus text.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

const LATENCY_CAPACITY: usize = 1000;

/// One completed request observation fed to the monitor.
#[derive(Debug, Clone)]
pub struct RequestObservation {
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub duration_ms: f64,
}

#[derive(Default)]
struct EndpointCounters {
    total: u64,
    success: u64,
    errors: u64,
}

struct LatencyBuffer {
    samples: VecDeque<f64>,
    running_sum: f64,
    dirty: bool,
    cached_p95: f64,
    cached_p99: f64,
}

impl Default for LatencyBuffer {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_CAPACITY),
            running_sum: 0.0,
            dirty: true,
            cached_p95: 0.0,
            cached_p99: 0.0,
        }
    }
}

impl LatencyBuffer {
    fn observe(&mut self, duration_ms: f64) {
        if self.samples.len() >= LATENCY_CAPACITY {
            if let Some(evicted) = self.samples.pop_front() {
                self.running_sum -= evicted;
            }
        }
        self.samples.push_back(duration_ms);
        self.running_sum += duration_ms;
        self.dirty = true;
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.running_sum / self.samples.len() as f64
        }
    }

    fn percentiles(&mut self) -> (f64, f64) {
        if self.dirty {
            let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            self.cached_p95 = percentile(&sorted, 0.95);
            self.cached_p99 = percentile(&sorted, 0.99);
            self.dirty = false;
        }
        (self.cached_p95, self.cached_p99)
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.running_sum = 0.0;
        self.dirty = true;
        self.cached_p95 = 0.0;
        self.cached_p99 = 0.0;
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Host-level gauges, sampled on a fixed interval by the caller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SystemGauges {
    pub memory_heap_used_bytes: u64,
    pub memory_heap_percent: f64,
    pub cpu_usage_percent: f64,
}

/// Cumulative kernel CPU counters between two samples, for delta computation.
#[derive(Debug, Clone, Copy)]
pub struct CpuSample {
    pub busy_ticks: u64,
    pub total_ticks: u64,
}

/// Structured snapshot returned by `snapshot()` and rendered to Prometheus
/// text by `render_prometheus()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_errors: u64,
    pub uptime_seconds: u64,
    pub response_time_avg_ms: f64,
    pub response_time_p95_ms: f64,
    pub response_time_p99_ms: f64,
    pub gauges: SystemGauges,
    pub per_endpoint: HashMap<String, EndpointSnapshot>,
}

/// Per-endpoint counters surfaced in the structured snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub total: u64,
    pub success: u64,
    pub errors: u64,
}

/// Performance monitor. Started at construction; `uptime_seconds` is
/// computed from that instant.
pub struct PerfMonitor {
    started_at: std::time::Instant,
    total: Mutex<EndpointCounters>,
    per_endpoint: Mutex<HashMap<String, EndpointCounters>>,
    latency: Mutex<LatencyBuffer>,
    gauges: Mutex<SystemGauges>,
    last_cpu_sample: Mutex<Option<CpuSample>>,
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfMonitor {
    /// Construct a monitor whose uptime clock starts now.
    pub fn new() -> Self {
        Self {
            started_at: std::time::Instant::now(),
            total: Mutex::new(EndpointCounters::default()),
            per_endpoint: Mutex::new(HashMap::new()),
            latency: Mutex::new(LatencyBuffer::default()),
            gauges: Mutex::new(SystemGauges::default()),
            last_cpu_sample: Mutex::new(None),
        }
    }

    /// Record one completed request.
    pub fn observe(&self, obs: RequestObservation) {
        let is_error = obs.status_code >= 400;
        {
            let mut total = self.total.lock();
            total.total += 1;
            if is_error {
                total.errors += 1;
            } else {
                total.success += 1;
            }
        }
        {
            let mut per_endpoint = self.per_endpoint.lock();
            let key = format!("{} {}", obs.method, obs.endpoint);
            let entry = per_endpoint.entry(key).or_default();
            entry.total += 1;
            if is_error {
                entry.errors += 1;
            } else {
                entry.success += 1;
            }
        }
        self.latency.lock().observe(obs.duration_ms);
    }

    /// Update host gauges from a fresh CPU counter sample; the first call
    /// after construction reports 0% CPU (no prior delta to compute from).
    pub fn sample_gauges(&self, cpu: CpuSample, memory_heap_used_bytes: u64, memory_heap_total_bytes: u64) {
        let cpu_percent = {
            let mut last = self.last_cpu_sample.lock();
            let percent = match *last {
                None => 0.0,
                Some(prev) => {
                    let busy_delta = cpu.busy_ticks.saturating_sub(prev.busy_ticks) as f64;
                    let total_delta = cpu.total_ticks.saturating_sub(prev.total_ticks) as f64;
                    if total_delta > 0.0 {
                        (busy_delta / total_delta) * 100.0
                    } else {
                        0.0
                    }
                }
            };
            *last = Some(cpu);
            percent
        };

        let heap_percent = if memory_heap_total_bytes > 0 {
            (memory_heap_used_bytes as f64 / memory_heap_total_bytes as f64) * 100.0
        } else {
            0.0
        };

        *self.gauges.lock() = SystemGauges {
            memory_heap_used_bytes,
            memory_heap_percent: heap_percent,
            cpu_usage_percent: cpu_percent,
        };
    }

    /// Reset every counter and empty the latency buffer. Gauges and the
    /// CPU-delta baseline are untouched.
    pub fn reset(&self) {
        *self.total.lock() = EndpointCounters::default();
        self.per_endpoint.lock().clear();
        self.latency.lock().reset();
    }

    /// Structured snapshot of every metric.
    pub fn snapshot(&self) -> PerfSnapshot {
        let total = self.total.lock();
        let (p95, p99) = self.latency.lock().percentiles();
        let avg = self.latency.lock().average();
        let per_endpoint = self
            .per_endpoint
            .lock()
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    EndpointSnapshot {
                        total: v.total,
                        success: v.success,
                        errors: v.errors,
                    },
                )
            })
            .collect();

        PerfSnapshot {
            requests_total: total.total,
            requests_success: total.success,
            requests_errors: total.errors,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            response_time_avg_ms: avg,
            response_time_p95_ms: p95,
            response_time_p99_ms: p99,
            gauges: *self.gauges.lock(),
            per_endpoint,
        }
    }

    /// Render the current snapshot as Prometheus text exposition.
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        push_counter(&mut out, "smarthome_requests_total", "Total requests handled", s.requests_total as f64);
        push_counter(&mut out, "smarthome_requests_success", "Requests completed without error", s.requests_success as f64);
        push_counter(&mut out, "smarthome_requests_errors", "Requests that returned an error status", s.requests_errors as f64);
        push_counter(&mut out, "smarthome_uptime_seconds", "Process uptime in seconds", s.uptime_seconds as f64);
        push_gauge(&mut out, "smarthome_response_time_avg", "Average response time in milliseconds", s.response_time_avg_ms);
        push_gauge(&mut out, "smarthome_response_time_p95", "95th percentile response time in milliseconds", s.response_time_p95_ms);
        push_gauge(&mut out, "smarthome_memory_heap_used", "Heap memory used in bytes", s.gauges.memory_heap_used_bytes as f64);
        push_gauge(&mut out, "smarthome_memory_heap_percent", "Heap memory used as a percentage", s.gauges.memory_heap_percent);
        push_gauge(&mut out, "smarthome_cpu_usage_percent", "CPU utilisation as a percentage", s.gauges.cpu_usage_percent);

        out
    }
}

fn push_counter(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"));
}

fn push_gauge(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(endpoint: &str, status: u16, duration_ms: f64) -> RequestObservation {
        RequestObservation {
            endpoint: endpoint.to_string(),
            method: "GET".to_string(),
            status_code: status,
            duration_ms,
        }
    }

    #[test]
    fn success_plus_errors_equals_total() {
        let m = PerfMonitor::new();
        m.observe(obs("/health", 200, 1.0));
        m.observe(obs("/health", 500, 2.0));
        m.observe(obs("/health", 404, 3.0));
        let s = m.snapshot();
        assert_eq!(s.requests_success + s.requests_errors, s.requests_total);
        assert_eq!(s.requests_total, 3);
        assert_eq!(s.requests_errors, 2);
    }

    #[test]
    fn latency_buffer_bounded_to_1000_samples() {
        let m = PerfMonitor::new();
        for i in 0..1500 {
            m.observe(obs("/x", 200, i as f64));
        }
        // Average over the most recent 1000 samples (500..1499).
        let s = m.snapshot();
        assert!((s.response_time_avg_ms - 999.5).abs() < 0.001);
    }

    #[test]
    fn percentiles_recompute_lazily_and_match_sorted_order() {
        let m = PerfMonitor::new();
        for i in 1..=100 {
            m.observe(obs("/x", 200, i as f64));
        }
        let s = m.snapshot();
        assert_eq!(s.response_time_p95_ms, 95.0);
        assert_eq!(s.response_time_p99_ms, 99.0);
    }

    #[test]
    fn reset_restores_to_never_recorded_state() {
        let m = PerfMonitor::new();
        for i in 0..10 {
            m.observe(obs("/x", 200, i as f64));
        }
        m.reset();
        let s = m.snapshot();
        assert_eq!(s.requests_total, 0);
        assert_eq!(s.response_time_avg_ms, 0.0);
    }

    #[test]
    fn first_cpu_sample_reports_zero_percent() {
        let m = PerfMonitor::new();
        m.sample_gauges(CpuSample { busy_ticks: 500, total_ticks: 1000 }, 100, 1000);
        assert_eq!(m.snapshot().gauges.cpu_usage_percent, 0.0);
    }

    #[test]
    fn subsequent_cpu_sample_computes_delta() {
        let m = PerfMonitor::new();
        m.sample_gauges(CpuSample { busy_ticks: 100, total_ticks: 1000 }, 100, 1000);
        m.sample_gauges(CpuSample { busy_ticks: 600, total_ticks: 2000 }, 100, 1000);
        // busy delta 500 / total delta 1000 = 50%.
        assert_eq!(m.snapshot().gauges.cpu_usage_percent, 50.0);
    }

    #[test]
    fn prometheus_exposition_includes_required_metric_names() {
        let m = PerfMonitor::new();
        m.observe(obs("/health", 200, 1.0));
        let text = m.render_prometheus();
        for name in [
            "smarthome_requests_total",
            "smarthome_requests_success",
            "smarthome_requests_errors",
            "smarthome_uptime_seconds",
            "smarthome_response_time_avg",
            "smarthome_response_time_p95",
            "smarthome_memory_heap_used",
            "smarthome_memory_heap_percent",
            "smarthome_cpu_usage_percent",
        ] {
            assert!(text.contains(&format!("# TYPE {name}")), "missing metric: {name}");
        }
    }
}
