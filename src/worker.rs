//! One worker task per concurrency slot: repeatedly borrow a connection,
//! pace against the group's QPS limiter, send the next templated request,
//! read the response, and report the result — cycling the connection every
//! `max_request` sends or on any I/O error.
//!
//! Grounded on the original Go `TcpGroup.task()`/`doReq()` in `group.go`,
//! with two deliberate departures recorded in the design notes: results are
//! sent with a non-blocking `try_send` rather than a blocking channel send,
//! and a full aggregator channel ends the worker cooperatively instead of
//! relying on a recovered panic from a send on a closed channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::aggregator::AggregatorHandle;
use crate::pool::ConnectionPool;
use crate::report::{Report, ResultEvent};
use crate::template::RequestTemplate;

pub struct WorkerConfig {
    pub max_request: u64,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_request: 100,
            read_timeout: Duration::from_secs(500),
            write_timeout: Duration::from_secs(500),
        }
    }
}

pub async fn run(
    pool: Arc<ConnectionPool>,
    templates: Arc<Vec<RequestTemplate>>,
    limiter: Arc<crate::limiter::QpsLimiter>,
    aggregator: AggregatorHandle,
    report: Arc<Report>,
    cfg: WorkerConfig,
    cancel: CancellationToken,
) {
    let Some(mut conn) = pool.get().await else {
        return;
    };
    let mut n: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            pool.put(conn).await;
            return;
        }

        if n >= cfg.max_request {
            pool.put(conn).await;
            n = 0;
            conn = match pool.get().await {
                Some(c) => c,
                None => return,
            };
        }

        limiter.acquire(&cancel).await;
        if cancel.is_cancelled() {
            pool.put(conn).await;
            return;
        }

        let template = &templates[(n % templates.len() as u64) as usize];
        let bytes = template.get_bytes();
        let start = Instant::now();

        match do_req(&mut conn, &bytes, cfg.write_timeout, cfg.read_timeout).await {
            Ok(status) => {
                let event = ResultEvent {
                    status,
                    latency: start.elapsed(),
                };
                if !aggregator.try_send(event) {
                    pool.put(conn).await;
                    return;
                }
                n += 1;
            }
            Err(e) => {
                report.record_error(e.to_string());
                pool.put(conn).await;
                n = 0;
                conn = match pool.get().await {
                    Some(c) => c,
                    None => return,
                };
            }
        }
    }
}

async fn do_req(
    conn: &mut crate::connection::Connection,
    bytes: &[u8],
    write_timeout: Duration,
    read_timeout: Duration,
) -> crate::error::Result<u16> {
    tokio::time::timeout(write_timeout, conn.write_all(bytes))
        .await
        .map_err(|_| crate::error::Error::WriteTimeout)??;
    let head = tokio::time::timeout(read_timeout, crate::http1::read_response(conn))
        .await
        .map_err(|_| crate::error::Error::ReadTimeout)??;
    Ok(head.status)
}
