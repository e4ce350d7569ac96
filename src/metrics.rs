//! Gate Metrics
//!
//! Counters and latency tracking for monitoring and alerting:
//! - Decisions by outcome
//! - Challenge issuance reasons and verification results
//! - Trap hits by kind
//! - Evaluation latency histogram
//!
//! Export formats:
//! - Prometheus text format
//! - JSON format

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Enable latency histograms
    pub latency_histograms: bool,
    /// Histogram bucket boundaries (ms)
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_histograms: true,
            histogram_buckets: vec![0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0],
        }
    }
}

/// Outcome of one evaluation, for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Allowed,
    Challenged,
    Blocked,
    TrapResponse,
}

/// Gate metrics collector
pub struct GateMetrics {
    config: MetricsConfig,

    requests_total: AtomicU64,
    requests_allowed: AtomicU64,
    requests_challenged: AtomicU64,
    requests_blocked: AtomicU64,
    trap_responses: AtomicU64,

    challenges_solved: AtomicU64,
    challenges_failed: AtomicU64,
    challenges_by_reason: RwLock<HashMap<String, u64>>,

    trap_hits_by_kind: RwLock<HashMap<String, u64>>,
    ips_blocked: AtomicU64,

    latency_histogram: RwLock<Histogram>,

    errors_total: AtomicU64,
    errors_by_type: RwLock<HashMap<String, u64>>,

    start_time: Instant,
}

impl GateMetrics {
    /// Create a new metrics collector
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            latency_histogram: RwLock::new(Histogram::new(config.histogram_buckets.clone())),
            config,
            requests_total: AtomicU64::new(0),
            requests_allowed: AtomicU64::new(0),
            requests_challenged: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
            trap_responses: AtomicU64::new(0),
            challenges_solved: AtomicU64::new(0),
            challenges_failed: AtomicU64::new(0),
            challenges_by_reason: RwLock::new(HashMap::new()),
            trap_hits_by_kind: RwLock::new(HashMap::new()),
            ips_blocked: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            errors_by_type: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record an evaluation outcome
    pub fn record_decision(&self, outcome: DecisionOutcome) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            DecisionOutcome::Allowed => &self.requests_allowed,
            DecisionOutcome::Challenged => &self.requests_challenged,
            DecisionOutcome::Blocked => &self.requests_blocked,
            DecisionOutcome::TrapResponse => &self.trap_responses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record why a challenge was issued
    pub fn record_challenge_issued(&self, reason: &str) {
        let mut by_reason = self.challenges_by_reason.write();
        *by_reason.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Record a challenge submission result
    pub fn record_challenge_result(&self, solved: bool) {
        if solved {
            self.challenges_solved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.challenges_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a trap hit
    pub fn record_trap_hit(&self, kind: &str) {
        let mut by_kind = self.trap_hits_by_kind.write();
        *by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Record a gate-issued block
    pub fn record_block(&self) {
        self.ips_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record evaluation latency
    pub fn record_latency(&self, duration: Duration) {
        if self.config.latency_histograms {
            let ms = duration.as_secs_f64() * 1000.0;
            self.latency_histogram.write().observe(ms);
        }
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        let mut errors = self.errors_by_type.write();
        *errors.entry(error_type.to_string()).or_insert(0) += 1;
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn prometheus(&self) -> String {
        let mut output = String::new();

        let counters = [
            ("gate_requests_total", "Total number of requests evaluated", &self.requests_total),
            ("gate_requests_allowed", "Requests allowed through", &self.requests_allowed),
            (
                "gate_requests_challenged",
                "Requests answered with a challenge",
                &self.requests_challenged,
            ),
            ("gate_requests_blocked", "Requests rejected as blocked", &self.requests_blocked),
            ("gate_trap_responses", "Requests that hit a trap", &self.trap_responses),
            ("gate_challenges_solved", "Challenges solved", &self.challenges_solved),
            ("gate_challenges_failed", "Failed challenge submissions", &self.challenges_failed),
            ("gate_ips_blocked", "Blocks issued by the gate", &self.ips_blocked),
            ("gate_errors_total", "Internal errors (request allowed)", &self.errors_total),
        ];
        for (name, help, counter) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
        }

        output.push_str("# HELP gate_challenges_by_reason Challenges issued by reason\n");
        output.push_str("# TYPE gate_challenges_by_reason counter\n");
        for (reason, count) in sorted(&self.challenges_by_reason.read()) {
            output.push_str(&format!(
                "gate_challenges_by_reason{{reason=\"{}\"}} {}\n",
                reason, count
            ));
        }

        output.push_str("# HELP gate_trap_hits_by_kind Trap hits by trap kind\n");
        output.push_str("# TYPE gate_trap_hits_by_kind counter\n");
        for (kind, count) in sorted(&self.trap_hits_by_kind.read()) {
            output.push_str(&format!(
                "gate_trap_hits_by_kind{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        if self.config.latency_histograms {
            output.push_str("# HELP gate_evaluation_latency_ms Request evaluation latency in milliseconds\n");
            output.push_str("# TYPE gate_evaluation_latency_ms histogram\n");
            let histogram = self.latency_histogram.read();
            for (bound, count) in histogram.buckets() {
                output.push_str(&format!(
                    "gate_evaluation_latency_ms_bucket{{le=\"{}\"}} {}\n",
                    bound, count
                ));
            }
            output.push_str(&format!(
                "gate_evaluation_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
                histogram.count()
            ));
            output.push_str(&format!("gate_evaluation_latency_ms_sum {}\n", histogram.sum()));
            output.push_str(&format!("gate_evaluation_latency_ms_count {}\n", histogram.count()));
        }

        output.push_str("# HELP gate_uptime_seconds Seconds since the gate started\n");
        output.push_str("# TYPE gate_uptime_seconds gauge\n");
        output.push_str(&format!("gate_uptime_seconds {}\n", self.uptime_secs()));

        output
    }

    /// Export metrics as JSON
    pub fn json(&self) -> serde_json::Value {
        let histogram = self.latency_histogram.read();

        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "allowed": self.requests_allowed.load(Ordering::Relaxed),
                "challenged": self.requests_challenged.load(Ordering::Relaxed),
                "blocked": self.requests_blocked.load(Ordering::Relaxed),
                "trap_responses": self.trap_responses.load(Ordering::Relaxed)
            },
            "challenges": {
                "solved": self.challenges_solved.load(Ordering::Relaxed),
                "failed": self.challenges_failed.load(Ordering::Relaxed),
                "by_reason": self.challenges_by_reason.read().clone()
            },
            "traps": {
                "by_kind": self.trap_hits_by_kind.read().clone()
            },
            "ips_blocked": self.ips_blocked.load(Ordering::Relaxed),
            "latency": {
                "p50_ms": histogram.percentile(50.0),
                "p90_ms": histogram.percentile(90.0),
                "p99_ms": histogram.percentile(99.0),
                "mean_ms": histogram.mean(),
                "count": histogram.count()
            },
            "errors": {
                "total": self.errors_total.load(Ordering::Relaxed),
                "by_type": self.errors_by_type.read().clone()
            },
            "uptime_seconds": self.uptime_secs()
        })
    }

    /// Get summary statistics
    pub fn summary(&self) -> MetricsSummary {
        let histogram = self.latency_histogram.read();

        MetricsSummary {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            requests_challenged: self.requests_challenged.load(Ordering::Relaxed),
            requests_blocked: self.requests_blocked.load(Ordering::Relaxed),
            trap_responses: self.trap_responses.load(Ordering::Relaxed),
            challenges_solved: self.challenges_solved.load(Ordering::Relaxed),
            challenges_failed: self.challenges_failed.load(Ordering::Relaxed),
            ips_blocked: self.ips_blocked.load(Ordering::Relaxed),
            latency_p50_ms: histogram.percentile(50.0),
            latency_p99_ms: histogram.percentile(99.0),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs(),
        }
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

/// Summary of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub requests_allowed: u64,
    pub requests_challenged: u64,
    pub requests_blocked: u64,
    pub trap_responses: u64,
    pub challenges_solved: u64,
    pub challenges_failed: u64,
    pub ips_blocked: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub errors_total: u64,
    pub uptime_secs: u64,
}

fn sorted(map: &HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort();
    entries
}

/// Simple histogram implementation
struct Histogram {
    buckets: Vec<(f64, u64)>,
    sum: f64,
    count: u64,
    values: Vec<f64>, // For percentile calculation
}

impl Histogram {
    fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = bucket_bounds.into_iter().map(|b| (b, 0u64)).collect();
        Self {
            buckets,
            sum: 0.0,
            count: 0,
            values: Vec::new(),
        }
    }

    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.values.push(value);

        // Keep values bounded for memory
        if self.values.len() > 10000 {
            self.values.remove(0);
        }

        for (bound, count) in &mut self.buckets {
            if value <= *bound {
                *count += 1;
            }
        }
    }

    fn buckets(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.buckets.iter().copied()
    }

    fn sum(&self) -> f64 {
        self.sum
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}
