//! Bootstraps every group's pool and workers, starts the aggregator, and
//! owns the run's single cancellation point: a wall clock deadline raced
//! against an OS signal.
//!
//! Grounded on the original Go `RunConf.Run()`/`init()`/`timer()` in
//! `run.go`. The original's `timer()` busy-polls elapsed time every tick;
//! here a single `tokio::select!` across the deadline sleep and the signal
//! future replaces the poll loop entirely, per the design notes' explicit
//! re-architecture guidance.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::aggregator::{self, MIN_CHANNEL_CAPACITY};
use crate::config::RunConfig;
use crate::connection::ByteCounters;
use crate::error::Result;
use crate::limiter::QpsLimiter;
use crate::params::ParamSource;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::report::Report;
use crate::template::RequestTemplate;
use crate::worker::{self, WorkerConfig};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(500);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(500);

pub async fn run(conf: RunConfig) -> Result<Arc<Report>> {
    conf.validate()?;

    let params_by_name = build_params(&conf)?;

    let counters = Arc::new(ByteCounters::default());
    let report = Arc::new(Report::new(counters.clone()));
    let cancel = CancellationToken::new();

    let total_max_qps: u64 = conf.tcp_groups.iter().map(|g| g.max_qps as u64).sum();
    let channel_capacity = std::cmp::max(MIN_CHANNEL_CAPACITY as u64, total_max_qps) as usize;
    let (aggregator_handle, aggregator_task) = aggregator::spawn(channel_capacity, report.clone(), cancel.clone());

    let mut worker_tasks = Vec::new();
    for group in &conf.tcp_groups {
        let templates = Arc::new(build_templates(group, &conf, &params_by_name)?);

        let tcp_conn_thread = if group.tcp_conn_thread == 0 {
            group.req_thread / group.max_request.max(1) as usize + 1
        } else {
            group.tcp_conn_thread
        };
        let src_ips: Vec<IpAddr> = group
            .src_ip
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        let tcp_creat_thread = if group.tcp_creat_thread == 0 {
            if src_ips.is_empty() { 1 } else { src_ips.len() / 2 + 1 }
        } else {
            group.tcp_creat_thread
        };

        let pool_cfg = PoolConfig {
            dst: group.dst.clone(),
            src_ips,
            max_conn_per_ip: group.max_tcp_conn_per_ip,
            creator_threads: tcp_creat_thread,
            creator_rate: group.tcp_creat_rate,
            factory_threads: tcp_conn_thread.max(1),
            is_tls: group.is_https,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        };
        let pool = ConnectionPool::create(pool_cfg, counters.clone(), cancel.clone()).await?;
        tracing::info!(group = %group.name, live = pool.live_count(), max = pool.max_conn(), "pool ready");

        let limiter = Arc::new(QpsLimiter::new(group.max_qps));
        let worker_cfg = WorkerConfig {
            max_request: group.max_request,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        };

        for _ in 0..group.req_thread {
            let pool = pool.clone();
            let templates = templates.clone();
            let limiter = limiter.clone();
            let aggregator_handle = aggregator_handle.clone();
            let report = report.clone();
            let cancel = cancel.clone();
            let worker_cfg = WorkerConfig {
                max_request: worker_cfg.max_request,
                read_timeout: worker_cfg.read_timeout,
                write_timeout: worker_cfg.write_timeout,
            };
            worker_tasks.push(tokio::spawn(worker::run(
                pool,
                templates,
                limiter,
                aggregator_handle,
                report,
                worker_cfg,
                cancel,
            )));
        }
    }

    wait_for_shutdown(conf.run_time, cancel.clone()).await;

    for task in worker_tasks {
        let _ = task.await;
    }
    let _ = aggregator_task.await;

    Ok(report)
}

async fn wait_for_shutdown(run_time_secs: u64, cancel: CancellationToken) {
    let deadline = tokio::time::sleep(Duration::from_secs(run_time_secs));
    tokio::select! {
        _ = deadline => {
            tracing::info!("run time elapsed, shutting down");
        }
        _ = signal_received() => {
            tracing::info!("signal received, shutting down");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}

#[cfg(unix)]
async fn signal_received() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn signal_received() {
    let _ = tokio::signal::ctrl_c().await;
}

fn build_params(conf: &RunConfig) -> Result<HashMap<String, Arc<ParamSource>>> {
    conf.params
        .iter()
        .map(|p| ParamSource::from_conf(p).map(|p| (p.name().to_string(), Arc::new(p))))
        .collect()
}

fn build_templates(
    group: &crate::config::TcpGroup,
    conf: &RunConfig,
    params_by_name: &HashMap<String, Arc<ParamSource>>,
) -> Result<Vec<RequestTemplate>> {
    group
        .send_http
        .iter()
        .map(|name| {
            let http_conf = conf
                .http_confs
                .iter()
                .find(|h| &h.name == name)
                .expect("validated by RunConfig::validate");
            let mut http_conf = http_conf.clone();
            crate::uri::ensure_host_header(&mut http_conf.header, &group.dst, group.is_https);
            RequestTemplate::build(&http_conf, params_by_name)
        })
        .collect()
}
