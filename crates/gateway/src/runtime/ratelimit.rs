//! Sliding-window rate limiting keyed by client IP.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("rate limit exceeded: {limit} requests per {window_secs}s")]
pub struct RateLimitError {
    pub limit: usize,
    pub window_secs: u64,
    /// Time until the oldest event leaves the window.
    pub retry_after: Duration,
}

impl From<RateLimitError> for sb_domain::error::Error {
    fn from(_: RateLimitError) -> Self {
        sb_domain::error::Error::RateLimited
    }
}

/// At most `limit` events per `window` for each IP.
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Pairing-code attempts: 10 per minute.
    pub fn pairing() -> Self {
        Self::new(10, Duration::from_secs(60))
    }

    /// Authenticated API traffic: 120 per minute.
    pub fn api() -> Self {
        Self::new(120, Duration::from_secs(60))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record one event for `ip`, or fail when the window is full.
    pub fn try_acquire(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.try_acquire_at(ip, Instant::now())
    }

    fn try_acquire_at(&self, ip: IpAddr, now: Instant) -> Result<(), RateLimitError> {
        let mut buckets = self.buckets.lock();
        self.prune(&mut buckets, now);
        let bucket = buckets.entry(ip).or_default();
        if bucket.len() >= self.limit {
            return Err(self.exceeded(bucket, now));
        }
        bucket.push_back(now);
        Ok(())
    }

    /// Fail when `ip` has no slot left, without consuming one.
    pub fn ensure_available(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&ip) else {
            return Ok(());
        };
        evict_expired(bucket, now, self.window);
        if bucket.len() >= self.limit {
            return Err(self.exceeded(bucket, now));
        }
        Ok(())
    }

    /// Slots currently used by `ip`.
    pub fn used(&self, ip: IpAddr) -> usize {
        let now = Instant::now();
        self.buckets
            .lock()
            .get(&ip)
            .map_or(0, |b| b.iter().filter(|t| now.duration_since(**t) < self.window).count())
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    fn exceeded(&self, bucket: &VecDeque<Instant>, now: Instant) -> RateLimitError {
        let retry_after = bucket
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default();
        RateLimitError {
            limit: self.limit,
            window_secs: self.window.as_secs(),
            retry_after,
        }
    }

    /// Lazy pruning: expire old events everywhere and drop empty buckets.
    fn prune(&self, buckets: &mut HashMap<IpAddr, VecDeque<Instant>>, now: Instant) {
        buckets.retain(|_, bucket| {
            evict_expired(bucket, now, self.window);
            !bucket.is_empty()
        });
    }
}

fn evict_expired(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while bucket
        .front()
        .is_some_and(|t| now.duration_since(*t) >= window)
    {
        bucket.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn blocks_after_limit_per_ip() {
        let rl = SlidingWindow::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            rl.try_acquire(A).unwrap();
        }
        let err = rl.try_acquire(A).unwrap_err();
        assert_eq!(err.limit, 3);
        assert!(err.retry_after <= Duration::from_secs(60));
        rl.try_acquire(B).unwrap();
        assert_eq!(rl.used(A), 3);
        assert_eq!(rl.used(B), 1);
    }

    #[test]
    fn window_slides() {
        let rl = SlidingWindow::new(2, Duration::from_secs(10));
        let t0 = Instant::now();
        rl.try_acquire_at(A, t0).unwrap();
        rl.try_acquire_at(A, t0 + Duration::from_secs(5)).unwrap();
        assert!(rl.try_acquire_at(A, t0 + Duration::from_secs(9)).is_err());
        rl.try_acquire_at(A, t0 + Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn ensure_available_does_not_consume() {
        let rl = SlidingWindow::new(1, Duration::from_secs(60));
        rl.ensure_available(A).unwrap();
        rl.ensure_available(A).unwrap();
        assert_eq!(rl.used(A), 0);
        rl.try_acquire(A).unwrap();
        assert!(rl.ensure_available(A).is_err());
    }

    #[test]
    fn expired_buckets_are_pruned_on_insert() {
        let rl = SlidingWindow::new(5, Duration::from_secs(1));
        let t0 = Instant::now();
        rl.try_acquire_at(A, t0).unwrap();
        rl.try_acquire_at(B, t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(rl.tracked_clients(), 1);
    }
}
