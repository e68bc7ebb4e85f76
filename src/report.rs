//! The aggregate report: success/byte counters updated atomically, status
//! and error histograms and the latency quantile estimator behind a single
//! read-write lock, matching the split the original Go `Report` struct
//! draws between its atomic counters and its `quantile.Stream`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use hdrhistogram::Histogram;

use crate::connection::ByteCounters;

const QUANTILES: [f64; 5] = [0.50, 0.75, 0.90, 0.95, 0.99];

pub struct ResultEvent {
    pub status: u16,
    pub latency: std::time::Duration,
}

struct Locked {
    status_hist: HashMap<u16, u64>,
    error_hist: HashMap<String, u64>,
    latency_hist: Histogram<u64>,
    start_time: Option<Instant>,
    last_print: Option<Instant>,
}

pub struct Report {
    success: AtomicU64,
    window_success: AtomicU64,
    window_sum_us: AtomicU64,
    total_sum_us: AtomicU64,
    counters: Arc<ByteCounters>,
    locked: RwLock<Locked>,
}

pub struct PeriodicRow {
    pub elapsed_secs: f64,
    pub success: u64,
    pub window_rate: u64,
    pub window_mean_latency_ms: f64,
    pub send_mbps: f64,
    pub recv_mbps: f64,
    pub status_hist: HashMap<u16, u64>,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct FinalSummary {
    pub elapsed_secs: f64,
    pub success: u64,
    pub avg_qps: f64,
    pub mean_latency_ms: f64,
    pub send_mbps: f64,
    pub recv_mbps: f64,
    pub status_hist: HashMap<u16, u64>,
    pub error_hist: HashMap<String, u64>,
    pub quantiles_ms: Vec<(f64, f64)>,
}

impl Report {
    pub fn new(counters: Arc<ByteCounters>) -> Self {
        Self {
            success: AtomicU64::new(0),
            window_success: AtomicU64::new(0),
            window_sum_us: AtomicU64::new(0),
            total_sum_us: AtomicU64::new(0),
            counters,
            locked: RwLock::new(Locked {
                status_hist: HashMap::new(),
                error_hist: HashMap::new(),
                // 3 significant digits over a 1us..1hr range is ample for
                // a load test's latency distribution.
                latency_hist: Histogram::new(3).expect("valid histogram params"),
                start_time: None,
                last_print: None,
            }),
        }
    }

    pub fn record(&self, event: ResultEvent) {
        let mut locked = self.locked.write().unwrap();
        let now = Instant::now();
        if locked.start_time.is_none() {
            locked.start_time = Some(now);
            locked.last_print = Some(now);
        }
        self.success.fetch_add(1, Ordering::Relaxed);
        self.window_success.fetch_add(1, Ordering::Relaxed);
        *locked.status_hist.entry(event.status).or_insert(0) += 1;

        let us = event.latency.as_micros().min(u64::MAX as u128) as u64;
        self.window_sum_us.fetch_add(us, Ordering::Relaxed);
        self.total_sum_us.fetch_add(us, Ordering::Relaxed);
        let _ = locked.latency_hist.record(us);
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let mut locked = self.locked.write().unwrap();
        *locked.error_hist.entry(error.into()).or_insert(0) += 1;
    }

    /// Should the caller print a periodic row yet? True once a second has
    /// elapsed since the last print.
    pub fn due_for_print(&self) -> bool {
        let locked = self.locked.read().unwrap();
        match locked.last_print {
            Some(t) => t.elapsed() >= std::time::Duration::from_secs(1),
            None => false,
        }
    }

    pub fn periodic_row(&self) -> Option<PeriodicRow> {
        let mut locked = self.locked.write().unwrap();
        let start = locked.start_time?;
        let elapsed_secs = start.elapsed().as_secs_f64();
        let window_success = self.window_success.swap(0, Ordering::Relaxed);
        let window_sum_us = self.window_sum_us.swap(0, Ordering::Relaxed);
        locked.last_print = Some(Instant::now());

        let window_mean_latency_ms = if window_success > 0 {
            (window_sum_us as f64 / window_success as f64) / 1000.0
        } else {
            0.0
        };

        Some(PeriodicRow {
            elapsed_secs,
            success: self.success.load(Ordering::Relaxed),
            window_rate: window_success,
            window_mean_latency_ms,
            send_mbps: mbps(self.counters.bytes_out.load(Ordering::Relaxed), elapsed_secs),
            recv_mbps: mbps(self.counters.bytes_in.load(Ordering::Relaxed), elapsed_secs),
            status_hist: locked.status_hist.clone(),
        })
    }

    pub fn final_summary(&self) -> FinalSummary {
        let locked = self.locked.read().unwrap();
        let elapsed_secs = locked
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
            .max(f64::MIN_POSITIVE);
        let success = self.success.load(Ordering::Relaxed);
        let total_sum_us = self.total_sum_us.load(Ordering::Relaxed);
        let mean_latency_ms = if success > 0 {
            (total_sum_us as f64 / success as f64) / 1000.0
        } else {
            0.0
        };
        let quantiles_ms = QUANTILES
            .iter()
            .map(|&q| (q, locked.latency_hist.value_at_quantile(q) as f64 / 1000.0))
            .collect();

        FinalSummary {
            elapsed_secs,
            success,
            avg_qps: success as f64 / elapsed_secs,
            mean_latency_ms,
            send_mbps: mbps(self.counters.bytes_out.load(Ordering::Relaxed), elapsed_secs),
            recv_mbps: mbps(self.counters.bytes_in.load(Ordering::Relaxed), elapsed_secs),
            status_hist: locked.status_hist.clone(),
            error_hist: locked.error_hist.clone(),
            quantiles_ms,
        }
    }
}

/// decimal megabits per second: bytes * 8 / 1_000_000 / elapsed.
fn mbps(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0 / 1_000_000.0) / elapsed_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn success_equals_sum_of_status_histogram() {
        let report = Report::new(Arc::new(ByteCounters::default()));
        for status in [200, 200, 500, 404] {
            report.record(ResultEvent {
                status,
                latency: Duration::from_millis(1),
            });
        }
        let summary = report.final_summary();
        let total: u64 = summary.status_hist.values().sum();
        assert_eq!(total, summary.success);
        assert_eq!(summary.success, 4);
    }

    #[test]
    fn quantiles_are_monotonic() {
        let report = Report::new(Arc::new(ByteCounters::default()));
        for ms in 1..=1000u64 {
            report.record(ResultEvent {
                status: 200,
                latency: Duration::from_millis(ms),
            });
        }
        let summary = report.final_summary();
        let values: Vec<f64> = summary.quantiles_ms.iter().map(|(_, v)| *v).collect();
        for w in values.windows(2) {
            assert!(w[0] <= w[1]);
        }
        // p99 of a uniform 1..=1000ms distribution should land near 990ms.
        let p99 = summary.quantiles_ms.last().unwrap().1;
        assert!((900.0..=1000.0).contains(&p99));
    }
}
