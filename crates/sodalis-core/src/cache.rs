use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::pymk::Suggestion;

/// A recommendation result is valid for exactly one (user, k, epoch)
/// combination; any graph mutation touching the user shifts the epoch and
/// strands the old entry until it ages out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user: u64,
    pub k: usize,
    pub epoch: u64,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Observability callbacks. `on_evict` fires for capacity evictions only;
/// an entry dropped because it expired counts as a miss.
#[derive(Default)]
pub struct CacheHooks {
    pub on_hit: Option<Hook>,
    pub on_miss: Option<Hook>,
    pub on_evict: Option<Hook>,
}

struct Entry {
    value: Vec<Suggestion>,
    expires_at: Instant,
}

/// Bounded TTL + LRU cache of PYMK results: an `lru::LruCache` behind a
/// mutex, with expiry checked lazily on `get`. `capacity == 0` disables
/// the cache entirely.
pub struct SuggestionCache {
    ttl: Duration,
    hooks: CacheHooks,
    entries: Option<Mutex<LruCache<CacheKey, Entry>>>,
}

impl SuggestionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_hooks(capacity, ttl, CacheHooks::default())
    }

    pub fn with_hooks(capacity: usize, ttl: Duration, hooks: CacheHooks) -> Self {
        let entries = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { ttl, hooks, entries }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Suggestion>> {
        enum Probe {
            Absent,
            Expired,
            Live,
        }
        let entries = self.entries.as_ref()?;
        let mut guard = entries.lock();
        let now = Instant::now();
        // A hit promotes the entry to most recently used.
        let probe = match guard.get(key) {
            None => Probe::Absent,
            Some(entry) if now > entry.expires_at => Probe::Expired,
            Some(_) => Probe::Live,
        };
        match probe {
            Probe::Absent => {
                drop(guard);
                fire(&self.hooks.on_miss);
                None
            }
            Probe::Expired => {
                guard.pop(key);
                drop(guard);
                fire(&self.hooks.on_miss);
                None
            }
            Probe::Live => {
                let value = guard.peek(key).map(|entry| entry.value.clone());
                drop(guard);
                fire(&self.hooks.on_hit);
                value
            }
        }
    }

    pub fn set(&self, key: CacheKey, value: Vec<Suggestion>) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        let entry = Entry { value, expires_at: Instant::now() + self.ttl };
        let displaced = entries.lock().push(key, entry);
        // push reports the displaced pair: the same key back means a
        // replace, a different key is a capacity eviction.
        if displaced.is_some_and(|(old, _)| old != key) {
            fire(&self.hooks.on_evict);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fire(hook: &Option<Hook>) {
    if let Some(f) = hook {
        f();
    }
}
