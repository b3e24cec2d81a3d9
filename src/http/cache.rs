//! In-memory response cache.
//!
//! Successful responses are kept for a TTL so repeated lookups of the same
//! detail page (batch reruns, merge-all fan-outs sharing an endpoint) do not
//! go back to the site. [`TtlLruCache`] evicts the least recently used entry
//! once `capacity` is reached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::FetchResponse;
use crate::config::CacheConfig;

/// Storage for fetched responses, keyed by URL.
pub trait ResponseCache: Send + Sync {
    /// Returns a live entry and marks it recently used.
    fn get(&self, key: &str) -> Option<FetchResponse>;
    /// Stores an entry, evicting as needed.
    fn put(&self, key: &str, response: FetchResponse);
    /// Drops expired entries; returns how many were removed.
    fn sweep_expired(&self) -> usize;
    /// Number of stored entries (including not yet swept expired ones).
    fn len(&self) -> usize;
    /// Whether the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sweeps expired entries every `period` until the cache is dropped.
#[must_use]
pub fn spawn_sweeper(cache: &Arc<dyn ResponseCache>, period: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(cache);
    let period = period.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(cache) = weak.upgrade() else {
                break;
            };
            let removed = cache.sweep_expired();
            if removed > 0 {
                debug!(removed, remaining = cache.len(), "swept expired cache entries");
            }
        }
    })
}

#[derive(Debug)]
struct CacheSlot {
    response: FetchResponse,
    expires_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    slots: HashMap<String, CacheSlot>,
    clock: u64,
}

/// TTL cache with least-recently-used eviction.
#[derive(Debug)]
pub struct TtlLruCache {
    ttl: Duration,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl TtlLruCache {
    /// Creates a cache holding at most `capacity` entries for `ttl` each.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Creates a cache from config.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseCache for TtlLruCache {
    fn get(&self, key: &str) -> Option<FetchResponse> {
        let now = Instant::now();
        let mut state = self.lock();
        state.clock += 1;
        let tick = state.clock;

        let expired = match state.slots.get_mut(key) {
            Some(slot) if slot.expires_at > now => {
                slot.last_used = tick;
                trace!(key, "cache hit");
                return Some(slot.response.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.slots.remove(key);
            trace!(key, "cache entry expired");
        }
        None
    }

    fn put(&self, key: &str, response: FetchResponse) {
        let now = Instant::now();
        let mut state = self.lock();
        state.clock += 1;
        let tick = state.clock;

        if !state.slots.contains_key(key) && state.slots.len() >= self.capacity {
            let oldest = state
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                trace!(evicted = %oldest, "cache eviction");
                state.slots.remove(&oldest);
            }
        }
        state.slots.insert(
            key.to_string(),
            CacheSlot {
                response,
                expires_at: now + self.ttl,
                last_used: tick,
            },
        );
    }

    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.slots.len();
        state.slots.retain(|_, slot| slot.expires_at > now);
        before - state.slots.len()
    }

    fn len(&self) -> usize {
        self.lock().slots.len()
    }
}
