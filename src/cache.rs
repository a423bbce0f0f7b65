//! Sharded in-memory response cache.
//!
//! 256 shards selected by FNV-1a of the key `"<name>:<qtype>"`. Values are
//! fully serialized responses; the transaction id (the first two bytes) is
//! rewritten at hit time to match the asking request. A background sweeper
//! deletes expired entries every five minutes.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace};

const SHARD_COUNT: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct CacheLine {
    bytes: Vec<u8>,
    expires_at: Instant,
}

pub struct ResponseCache {
    shards: Vec<Mutex<FxHashMap<String, CacheLine>>>,
}

fn fnv1a(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<FxHashMap<String, CacheLine>> {
        &self.shards[(fnv1a(key) % SHARD_COUNT as u64) as usize]
    }

    /// Look up a response. On a hit the stored bytes are cloned and their
    /// transaction id replaced with `request_id` before delivery. Expired
    /// entries are never returned.
    pub fn get(&self, key: &str, request_id: u16) -> Option<Vec<u8>> {
        let mut shard = self.shard(key).lock();
        let line = shard.get(key)?;
        if line.expires_at <= Instant::now() {
            shard.remove(key);
            return None;
        }

        let mut bytes = line.bytes.clone();
        if bytes.len() >= 2 {
            bytes[0..2].copy_from_slice(&request_id.to_be_bytes());
        }
        trace!(key, "cache hit");
        Some(bytes)
    }

    /// Store a response. Entries with a zero TTL are not cached.
    pub fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let line = CacheLine {
            bytes,
            expires_at: Instant::now() + ttl,
        };
        self.shard(key).lock().insert(key.to_string(), line);
    }

    pub fn remove(&self, key: &str) {
        self.shard(key).lock().remove(key);
    }

    pub fn flush(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Drop expired entries across all shards. Returns the count removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, line| line.expires_at > now);
            removed += before - shard.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background sweeper; runs until the shutdown signal fires.
    pub async fn run_sweeper(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = self.cleanup();
                    if removed > 0 {
                        debug!(removed, "cache sweep");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("cache sweeper stopping");
                    return;
                }
            }
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
