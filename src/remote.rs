//! Distributed fan-out: send each remote worker its slice of the run
//! configuration, poll for completion, and merge the reports into one
//! final summary.
//!
//! Grounded on the original Go `RemoteRun`/`sendRemoteConf`/`GetRemoteReport`
//! in `run.go`: same literal `POST /run` + polling `GET /report` exchange,
//! same `running`/`start` sentinel strings understood on the wire.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::report::FinalSummary;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(conf: &RunConfig) -> Result<()> {
    let mut handles = Vec::new();
    for (addr, groups) in &conf.remote_server {
        let sub = conf.sub_config_for(groups);
        let body = sub.to_yaml()?;
        post(addr, "/run", &body).await?;
        handles.push(addr.clone());
    }

    let mut summaries = Vec::new();
    for addr in handles {
        loop {
            let resp = get(&addr, "/report").await?;
            if resp.trim() == "running" {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            let summary: FinalSummary = serde_yaml::from_str(&resp)
                .map_err(|e| Error::Config(format!("malformed report from {addr}: {e}")))?;
            summaries.push(summary);
            break;
        }
    }

    crate::aggregator::print_final(&merge_summaries(&summaries));
    Ok(())
}

fn split_addr(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(80)),
        None => (addr, 80),
    }
}

async fn post(addr: &str, path: &str, body: &str) -> Result<String> {
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/x-yaml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    exchange(addr, &request).await
}

async fn get(addr: &str, path: &str) -> Result<String> {
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    exchange(addr, &request).await
}

async fn exchange(addr: &str, request: &str) -> Result<String> {
    let (host, port) = split_addr(addr);
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;

    let split = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| Error::Parse(httparse::Error::Status))?;
    let body = &buf[split + 4..];
    Ok(String::from_utf8_lossy(body).into_owned())
}

/// Fold one report's worth of scalar counters and histograms from every
/// remote worker into a single summary, printed through the same formatting
/// path a local run uses. Workers run the same wall-clock window, so
/// `elapsed_secs` takes the max rather than a sum; quantiles are not
/// re-derivable from already-reduced per-worker quantiles, so the merged
/// value at each target quantile is a success-weighted average across
/// workers, which is exact when the underlying latency distributions are
/// similar across workers and otherwise remains a reasonable estimate.
fn merge_summaries(summaries: &[FinalSummary]) -> FinalSummary {
    let elapsed_secs = summaries.iter().map(|s| s.elapsed_secs).fold(0.0, f64::max).max(f64::MIN_POSITIVE);
    let success: u64 = summaries.iter().map(|s| s.success).sum();
    let send_mbps: f64 = summaries.iter().map(|s| s.send_mbps).sum();
    let recv_mbps: f64 = summaries.iter().map(|s| s.recv_mbps).sum();

    let mean_latency_ms = weighted_mean(summaries, |s| s.mean_latency_ms);

    let status_hist = merge_status_hist(summaries.iter().map(|s| &s.status_hist));
    let error_hist = merge_status_hist(summaries.iter().map(|s| &s.error_hist));

    let quantile_count = summaries.iter().map(|s| s.quantiles_ms.len()).max().unwrap_or(0);
    let quantiles_ms = (0..quantile_count)
        .map(|i| {
            let q = summaries
                .iter()
                .find_map(|s| s.quantiles_ms.get(i))
                .map(|(q, _)| *q)
                .unwrap_or(0.0);
            let v = weighted_mean(summaries, |s| s.quantiles_ms.get(i).map(|(_, v)| *v).unwrap_or(0.0));
            (q, v)
        })
        .collect();

    FinalSummary {
        elapsed_secs,
        success,
        avg_qps: success as f64 / elapsed_secs,
        mean_latency_ms,
        send_mbps,
        recv_mbps,
        status_hist,
        error_hist,
        quantiles_ms,
    }
}

fn weighted_mean(summaries: &[FinalSummary], value: impl Fn(&FinalSummary) -> f64) -> f64 {
    let total_success: u64 = summaries.iter().map(|s| s.success).sum();
    if total_success == 0 {
        return 0.0;
    }
    summaries
        .iter()
        .map(|s| value(s) * s.success as f64)
        .sum::<f64>()
        / total_success as f64
}

fn merge_status_hist<'a, K, I>(maps: I) -> HashMap<K, u64>
where
    K: Eq + Hash + Clone + 'a,
    I: IntoIterator<Item = &'a HashMap<K, u64>>,
{
    let mut out = HashMap::new();
    for m in maps {
        for (k, v) in m {
            *out.entry(k.clone()).or_insert(0) += v;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(success: u64, status: &[(u16, u64)]) -> FinalSummary {
        FinalSummary {
            elapsed_secs: 10.0,
            success,
            avg_qps: success as f64 / 10.0,
            mean_latency_ms: 5.0,
            send_mbps: 1.0,
            recv_mbps: 2.0,
            status_hist: status.iter().cloned().collect(),
            error_hist: HashMap::new(),
            quantiles_ms: vec![(0.50, 4.0), (0.99, 9.0)],
        }
    }

    #[test]
    fn merge_sums_success_and_status_histograms() {
        let merged = merge_summaries(&[summary(100, &[(200, 100)]), summary(50, &[(200, 40), (500, 10)])]);
        assert_eq!(merged.success, 150);
        assert_eq!(merged.status_hist.get(&200), Some(&140));
        assert_eq!(merged.status_hist.get(&500), Some(&10));
    }

    #[test]
    fn merge_throughput_sums_across_workers() {
        let merged = merge_summaries(&[summary(10, &[]), summary(10, &[])]);
        assert_eq!(merged.send_mbps, 2.0);
        assert_eq!(merged.recv_mbps, 4.0);
    }

    #[test]
    fn merge_keeps_quantile_fractions() {
        let merged = merge_summaries(&[summary(10, &[]), summary(10, &[])]);
        let fractions: Vec<f64> = merged.quantiles_ms.iter().map(|(q, _)| *q).collect();
        assert_eq!(fractions, vec![0.50, 0.99]);
    }
}
