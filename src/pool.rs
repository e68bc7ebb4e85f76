//! Bulk connection pool: dials up to `max_conn` connections under a
//! creation rate cap, hands them out via a `free` channel, and recycles
//! broken ones via a separate `recycle` channel so that reconnection never
//! contends with normal borrow/return traffic.
//!
//! Grounded on the teacher crate's `pool.rs` (`ConnState`, free-list +
//! RAII guard shape) and on the original Go `internal/perf/pool.go`
//! (`creatConns` thread/remainder splitting, `factory` recycling loop,
//! `Get`/`GetWithoutClose` health check, `sync.Once` style shutdown).

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::connection::{ByteCounters, Connection, DialSpec};
use crate::error::{Error, Result};

const HEALTH_CHECK_DEADLINE: Duration = Duration::from_millis(10);

pub struct PoolConfig {
    pub dst: String,
    pub src_ips: Vec<IpAddr>,
    pub max_conn_per_ip: usize,
    pub creator_threads: usize,
    pub creator_rate: u32,
    pub factory_threads: usize,
    pub is_tls: bool,
    pub connect_timeout: Duration,
}

type RateLim = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct ConnectionPool {
    max_conn: usize,
    free_tx: mpsc::Sender<Connection>,
    free_rx: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    recycle_tx: mpsc::Sender<Connection>,
    live: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
    counters: Arc<ByteCounters>,
}

impl ConnectionPool {
    /// Build the pool and block until every connection it can establish has
    /// either succeeded or failed; `live_count()` afterwards reflects
    /// however many actually connected.
    pub async fn create(
        cfg: PoolConfig,
        counters: Arc<ByteCounters>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let addr = resolve(&cfg.dst)?;
        let srcs = cfg.src_ips.clone();
        let max_conn = std::cmp::max(1, srcs.len()) * cfg.max_conn_per_ip;

        let (free_tx, free_rx) = mpsc::channel(max_conn.max(1));
        let (recycle_tx, recycle_rx) = mpsc::channel(max_conn.max(1));

        let live = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let tls = if cfg.is_tls {
            Some(crate::tls::dangerous_connector()?)
        } else {
            None
        };

        let rate_limiter: Option<Arc<RateLim>> = if cfg.creator_rate > 0 {
            Some(Arc::new(RateLimiter::direct(Quota::per_second(
                std::num::NonZeroU32::new(cfg.creator_rate).unwrap(),
            ))))
        } else {
            None
        };

        let pool = Arc::new(Self {
            max_conn,
            free_tx: free_tx.clone(),
            free_rx: tokio::sync::Mutex::new(free_rx),
            recycle_tx: recycle_tx.clone(),
            live: live.clone(),
            closed: closed.clone(),
            cancel: cancel.clone(),
            counters: counters.clone(),
        });

        pool.fill(addr, &srcs, &cfg, tls.clone(), rate_limiter.clone()).await;
        pool.clone().spawn_factories(cfg.factory_threads.max(1), addr, tls, rate_limiter, recycle_rx);

        Ok(pool)
    }

    async fn fill(
        &self,
        addr: SocketAddr,
        srcs: &[IpAddr],
        cfg: &PoolConfig,
        tls: Option<tokio_rustls::TlsConnector>,
        rate_limiter: Option<Arc<RateLim>>,
    ) {
        let per_ip = cfg.max_conn_per_ip;
        let creator_threads = cfg.creator_threads.max(1);

        let mut jobs: Vec<(Option<IpAddr>, usize)> = Vec::new();
        if srcs.is_empty() {
            let threads = creator_threads.min(per_ip.max(1));
            let base = per_ip / threads;
            let remainder = per_ip % threads;
            for _ in 0..threads {
                jobs.push((None, base));
            }
            if remainder > 0 {
                jobs.push((None, remainder));
            }
        } else {
            let threads_per_ip = std::cmp::max(1, creator_threads / srcs.len());
            for &ip in srcs {
                let base = per_ip / threads_per_ip;
                let remainder = per_ip % threads_per_ip;
                for _ in 0..threads_per_ip {
                    jobs.push((Some(ip), base));
                }
                if remainder > 0 {
                    jobs.push((Some(ip), remainder));
                }
            }
        }

        let mut set = JoinSet::new();
        for (bind_ip, count) in jobs {
            if count == 0 {
                continue;
            }
            let free_tx = self.free_tx.clone();
            let live = self.live.clone();
            let cancel = self.cancel.clone();
            let tls = tls.clone();
            let rate_limiter = rate_limiter.clone();
            let connect_timeout = cfg.connect_timeout;
            let counters = self.counters.clone();
            set.spawn(async move {
                for _ in 0..count {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Some(rl) = &rate_limiter {
                        tokio::select! {
                            _ = rl.until_ready() => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                    let spec = DialSpec {
                        addr,
                        bind_ip,
                        tls: tls.clone(),
                        server_name: None,
                        connect_timeout,
                    };
                    match Connection::dial(spec, counters.clone()).await {
                        Ok(conn) => {
                            live.fetch_add(1, Ordering::Relaxed);
                            let _ = free_tx.send(conn).await;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "connection create failed");
                        }
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    fn spawn_factories(
        self: Arc<Self>,
        count: usize,
        addr: SocketAddr,
        tls: Option<tokio_rustls::TlsConnector>,
        rate_limiter: Option<Arc<RateLim>>,
        recycle_rx: mpsc::Receiver<Connection>,
    ) {
        let recycle_rx = Arc::new(tokio::sync::Mutex::new(recycle_rx));
        for _ in 0..count {
            let pool = self.clone();
            let recycle_rx = recycle_rx.clone();
            let tls = tls.clone();
            let rate_limiter = rate_limiter.clone();
            tokio::spawn(async move {
                loop {
                    let conn = {
                        let mut rx = recycle_rx.lock().await;
                        tokio::select! {
                            c = rx.recv() => c,
                            _ = pool.cancel.cancelled() => None,
                        }
                    };
                    let Some(old) = conn else {
                        return;
                    };
                    pool.live.fetch_sub(1, Ordering::Relaxed);
                    if pool.closed.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Some(rl) = &rate_limiter {
                        tokio::select! {
                            _ = rl.until_ready() => {}
                            _ = pool.cancel.cancelled() => return,
                        }
                    }
                    let spec = DialSpec {
                        addr,
                        bind_ip: old.dial_spec.bind_ip,
                        tls: tls.clone(),
                        server_name: old.dial_spec.server_name.clone(),
                        connect_timeout: old.dial_spec.connect_timeout,
                    };
                    match Connection::dial(spec, pool.counters.clone()).await {
                        Ok(conn) => {
                            pool.live.fetch_add(1, Ordering::Relaxed);
                            let _ = pool.free_tx.send(conn).await;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "connection recycle failed");
                            let _ = pool.recycle_tx.send(old).await;
                        }
                    }
                }
            });
        }
    }

    /// Borrow a connection, blocking until one is free or the pool is
    /// cancelled.
    pub async fn get(&self) -> Option<Connection> {
        let mut rx = self.free_rx.lock().await;
        tokio::select! {
            c = rx.recv() => c,
            _ = self.cancel.cancelled() => None,
        }
    }

    /// Like [`get`](Self::get), but probes for a half closed peer first and
    /// silently recycles it instead of handing it back out.
    pub async fn get_checked(&self) -> Option<Connection> {
        loop {
            let mut conn = self.get().await?;
            if conn.probe_closed(HEALTH_CHECK_DEADLINE).await {
                let _ = self.recycle_tx.send(conn).await;
                continue;
            }
            return Some(conn);
        }
    }

    /// Return a connection for recycling. Awaits channel capacity rather
    /// than dropping on full: unlike the aggregator's result channel, a
    /// dropped connection here would permanently shrink the pool below
    /// `max_conn`.
    pub async fn put(&self, conn: Connection) {
        let _ = self.recycle_tx.send(conn).await;
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn max_conn(&self) -> usize {
        self.max_conn
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
    }
}

fn resolve(dst: &str) -> Result<SocketAddr> {
    dst.to_socket_addrs()
        .map_err(|e| Error::Resolve(format!("{dst}: {e}")))?
        .next()
        .ok_or_else(|| Error::Resolve(format!("no address for {dst}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_host_port() {
        let addr = resolve("127.0.0.1:80").unwrap();
        assert_eq!(addr.port(), 80);
    }

    #[test]
    fn rejects_unresolvable_host() {
        assert!(resolve("this-host-does-not-exist.invalid:80").is_err());
    }
}
