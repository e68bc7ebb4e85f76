//! Single consumer task that turns a stream of worker results into the
//! running [`Report`], printing a row once a second and a final summary on
//! shutdown.
//!
//! Grounded on the original Go `Printer()` loop in `report.go`: same
//! one-second window semantics and same "drain remaining, then print final"
//! behavior on cancellation. The channel itself uses non-blocking
//! `try_send` on the producer side (workers) rather than the original's
//! blocking channel send — full is backpressure, not an error, and a
//! blocking send there would distort measured latency.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::report::{Report, ResultEvent};

pub const MIN_CHANNEL_CAPACITY: usize = 8192;

#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<ResultEvent>,
}

impl AggregatorHandle {
    /// Non-blocking: a full channel means the aggregator is the
    /// bottleneck, so the result is dropped rather than stalling the
    /// worker or growing memory without bound.
    pub fn try_send(&self, event: ResultEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

pub fn spawn(
    capacity: usize,
    report: Arc<Report>,
    cancel: CancellationToken,
) -> (AggregatorHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(MIN_CHANNEL_CAPACITY));
    let handle = AggregatorHandle { tx };

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        'outer: loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => report.record(event),
                        None => break 'outer,
                    }
                }
                _ = cancel.cancelled() => break 'outer,
                _ = ticker.tick() => {}
            }
            if report.due_for_print() {
                if let Some(row) = report.periodic_row() {
                    print_row(&row);
                }
            }
        }

        rx.close();
        while let Ok(event) = rx.try_recv() {
            report.record(event);
        }
        print_final(&report.final_summary());
    });

    (handle, task)
}

fn print_row(row: &crate::report::PeriodicRow) {
    tracing::info!(
        t = %format!("{:.0}s", row.elapsed_secs),
        success = row.success,
        rate = row.window_rate,
        mean_latency_ms = format!("{:.2}", row.window_mean_latency_ms),
        send_mbps = format!("{:.2}", row.send_mbps),
        recv_mbps = format!("{:.2}", row.recv_mbps),
        "progress",
    );
    println!(
        "{:>6.0}s  success={:<10} rate={:<8} latency={:>8.2}ms  send={:>8.2}Mbps recv={:>8.2}Mbps  status={:?}",
        row.elapsed_secs, row.success, row.window_rate, row.window_mean_latency_ms, row.send_mbps, row.recv_mbps, row.status_hist
    );
}

pub(crate) fn print_final(summary: &crate::report::FinalSummary) {
    println!("\n==== final report ====");
    println!("runtime:       {:.2}s", summary.elapsed_secs);
    println!("success:       {}", summary.success);
    println!("avg qps:       {:.2}", summary.avg_qps);
    println!("mean latency:  {:.2}ms", summary.mean_latency_ms);
    println!("send:          {:.2} Mbps", summary.send_mbps);
    println!("recv:          {:.2} Mbps", summary.recv_mbps);
    println!("status codes:  {:?}", summary.status_hist);
    if !summary.error_hist.is_empty() {
        println!("errors:        {:?}", summary.error_hist);
    }
    print!("latency quantiles (ms):");
    for (q, v) in &summary.quantiles_ms {
        print!("  p{:<4}={:.2}", (q * 100.0) as u32, v);
    }
    println!();
}
