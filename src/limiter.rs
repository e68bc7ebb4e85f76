//! Per-group QPS limiter: a token bucket with burst 1, shared by every
//! worker in the group. A configured rate of zero means no pacing at all.
//!
//! Grounded on the original Go `rate.NewLimiter(rate.Limit(maxQPS), 1)`
//! used once per `TcpGroup` in `group.go`; re-expressed with `governor`,
//! the rate limiting crate already idiomatic in this corpus.

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

type Inner = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

pub enum QpsLimiter {
    Unbounded,
    Bounded(Inner),
}

impl QpsLimiter {
    pub fn new(max_qps: u32) -> Self {
        match NonZeroU32::new(max_qps) {
            Some(n) => Self::Bounded(RateLimiter::direct(Quota::per_second(n))),
            None => Self::Unbounded,
        }
    }

    /// Wait for a token, or return early if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) {
        match self {
            Self::Unbounded => {}
            Self::Bounded(rl) => {
                tokio::select! {
                    _ = rl.until_ready() => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_rate_never_suspends() {
        let lim = QpsLimiter::new(0);
        let cancel = CancellationToken::new();
        for _ in 0..1000 {
            lim.acquire(&cancel).await;
        }
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_bounded_wait() {
        let lim = QpsLimiter::new(1);
        let cancel = CancellationToken::new();
        // drain the single burst token
        lim.acquire(&cancel).await;
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let start = tokio::time::Instant::now();
        lim.acquire(&cancel).await;
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }
}
