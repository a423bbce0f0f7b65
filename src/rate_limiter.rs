//! Per-client token bucket rate limiting.
//!
//! One bucket per source IP: tokens refill continuously at the configured
//! rate up to the burst capacity. A periodic GC drops buckets that have
//! been idle long enough to refill completely anyway.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Bucket capacity; also the initial fill of a fresh bucket.
    pub burst: f64,
    pub gc_interval: Duration,
    pub idle_eviction: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refill_per_sec: 200_000.0,
            burst: 100_000.0,
            gc_interval: Duration::from_secs(300),
            idle_eviction: Duration::from_secs(900),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<IpAddr, Mutex<Bucket>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    /// Take one token for this client if available. Fresh clients start
    /// with a full bucket.
    pub fn allow(&self, ip: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }

        let entry = self.buckets.entry(ip).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.config.burst,
                last_refill: Instant::now(),
            })
        });

        let mut bucket = entry.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_sec).min(self.config.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Evict buckets untouched for longer than the idle window.
    pub fn gc(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.lock().last_refill) < self.config.idle_eviction);
        before - self.buckets.len()
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    /// Background GC; runs until the shutdown signal fires.
    pub async fn run_gc(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.config.gc_interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let evicted = self.gc();
                    if evicted > 0 {
                        debug!(evicted, tracked = self.tracked(), "rate limiter gc");
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}
