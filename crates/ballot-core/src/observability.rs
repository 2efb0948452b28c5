//! Counters shared between the processing loop (writer) and the HTTP
//! reporter (reader).
//!
//! Everything is an atomic, so readers take independent snapshots and never
//! block the loop. Rendered in the Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Prometheus client default buckets (seconds).
pub const DEFAULT_DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Owned metrics state. Share it as `Arc<WorkerMetrics>`.
pub struct WorkerMetrics {
    processed_by_choice: DashMap<String, AtomicU64>,
    redis_errors: AtomicU64,
    database_errors: AtomicU64,
    decode_errors: AtomicU64,
    timestamp_fallbacks: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    health_healthy: AtomicU64,
    health_unhealthy: AtomicU64,
    process_duration: Histogram,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_DURATION_BUCKETS.to_vec())
    }

    pub fn with_buckets(buckets: Vec<f64>) -> Self {
        Self {
            processed_by_choice: DashMap::new(),
            redis_errors: AtomicU64::new(0),
            database_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            timestamp_fallbacks: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            health_healthy: AtomicU64::new(0),
            health_unhealthy: AtomicU64::new(0),
            process_duration: Histogram::new(buckets),
        }
    }

    pub fn inc_processed(&self, choice: &str) {
        if let Some(counter) = self.processed_by_choice.get(choice) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.processed_by_choice
            .entry(choice.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_redis_error(&self) {
        self.redis_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_database_error(&self) {
        self.database_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_timestamp_fallback(&self) {
        self.timestamp_fallbacks.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_health_check(&self, healthy: bool) {
        if healthy {
            self.health_healthy.fetch_add(1, Ordering::Relaxed);
        } else {
            self.health_unhealthy.fetch_add(1, Ordering::Relaxed);
        }
    }
    pub fn observe_process_secs(&self, secs: f64) {
        self.process_duration.observe(secs);
    }

    pub fn processed(&self, choice: &str) -> u64 {
        self.processed_by_choice
            .get(choice)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed_total: self
                .processed_by_choice
                .iter()
                .map(|e| e.value().load(Ordering::Relaxed))
                .sum(),
            redis_errors: self.redis_errors.load(Ordering::Relaxed),
            database_errors: self.database_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            timestamp_fallbacks: self.timestamp_fallbacks.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            observed: self.process_duration.count.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text format (0.0.4). `queue_depth` is sampled by the caller.
    pub fn render_prometheus(&self, queue_depth: Option<u64>) -> String {
        let mut s = String::with_capacity(1024);

        let name = env!("CARGO_PKG_NAME");
        let version = env!("CARGO_PKG_VERSION");
        let _ = writeln!(s, "# HELP ballot_build_info Build information");
        let _ = writeln!(s, "# TYPE ballot_build_info gauge");
        let _ = writeln!(
            s,
            "ballot_build_info{{name=\"{}\",version=\"{}\"}} 1",
            name, version
        );

        let _ = writeln!(s, "# HELP votes_processed_total Total number of votes processed");
        let _ = writeln!(s, "# TYPE votes_processed_total counter");
        let mut choices: Vec<(String, u64)> = self
            .processed_by_choice
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        choices.sort();
        for (choice, n) in choices {
            let _ = writeln!(
                s,
                "votes_processed_total{{choice=\"{}\"}} {}",
                escape_label(&choice),
                n
            );
        }

        counter(
            &mut s,
            "redis_errors_total",
            "Total number of Redis errors",
            &self.redis_errors,
        );
        counter(
            &mut s,
            "database_errors_total",
            "Total number of database errors",
            &self.database_errors,
        );
        counter(
            &mut s,
            "vote_decode_errors_total",
            "Malformed vote payloads dropped",
            &self.decode_errors,
        );
        counter(
            &mut s,
            "vote_timestamp_fallbacks_total",
            "Votes stored with the current time because their timestamp was unparseable",
            &self.timestamp_fallbacks,
        );
        counter(
            &mut s,
            "votes_requeued_total",
            "Votes pushed back onto the queue after a failed insert",
            &self.requeued,
        );
        counter(
            &mut s,
            "votes_dead_lettered_total",
            "Votes moved to the dead-letter list after exhausting insert attempts",
            &self.dead_lettered,
        );

        let _ = writeln!(s, "# HELP health_checks_total Total number of health checks");
        let _ = writeln!(s, "# TYPE health_checks_total counter");
        let _ = writeln!(
            s,
            "health_checks_total{{status=\"healthy\"}} {}",
            self.health_healthy.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            s,
            "health_checks_total{{status=\"unhealthy\"}} {}",
            self.health_unhealthy.load(Ordering::Relaxed)
        );

        if let Some(depth) = queue_depth {
            let _ = writeln!(s, "# HELP vote_queue_depth Votes waiting in the queue");
            let _ = writeln!(s, "# TYPE vote_queue_depth gauge");
            let _ = writeln!(s, "vote_queue_depth {}", depth);
        }

        self.process_duration.render(
            "vote_process_duration_seconds",
            "Time taken to process a vote",
            &mut s,
        );
        s
    }
}

/// Point-in-time copy of the scalar counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub processed_total: u64,
    pub redis_errors: u64,
    pub database_errors: u64,
    pub decode_errors: u64,
    pub timestamp_fallbacks: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub observed: u64,
}

fn counter(out: &mut String, name: &str, help: &str, value: &AtomicU64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value.load(Ordering::Relaxed));
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new(mut buckets: Vec<f64>) -> Self {
        buckets.retain(|b| b.is_finite());
        buckets.sort_by(|a, b| a.total_cmp(b));
        buckets.dedup();
        let counts = (0..buckets.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value_secs: f64) {
        let us = if value_secs.is_sign_positive() {
            (value_secs * 1_000_000.0) as u64
        } else {
            0
        };
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (i, b) in self.buckets.iter().enumerate() {
            if value_secs <= *b {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        let mut cumulative = 0u64;
        for (i, b) in self.buckets.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, b, cumulative);
        }
        let total = self.count.load(Ordering::Relaxed);
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, total);
        let sum_secs = (self.sum_us.load(Ordering::Relaxed) as f64) / 1_000_000.0;
        let _ = writeln!(out, "{}_sum {}", name, sum_secs);
        let _ = writeln!(out, "{}_count {}", name, total);
    }
}
