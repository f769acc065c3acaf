//! Response cache
//!
//! Bounded key/value store with a per-entry time-to-live.
//!
//! - Reads never return an expired entry; an expired entry found on read is removed.
//! - At capacity, the oldest inserted entry is evicted before a new one is added.
//! - Each entry owns a timer task that removes it once its TTL elapses, so
//!   memory is reclaimed without further reads. Timers only run inside a
//!   tokio runtime; outside one, expiry is enforced lazily on read.

use crate::request::{Method, QueryValue};
use lru::LruCache;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identity of a cacheable request.
///
/// Method and path are kept as separate fields so invalidation can match on
/// the path exactly, whatever characters it contains. Parameters are sorted
/// by name, `Null` values are dropped and every value is stored as the text
/// the URL carries plus a type tag, so two requests share a key only when
/// they would hit the same URL with the same parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    path: String,
    params: Vec<(String, char, String)>,
}

impl CacheKey {
    pub fn new(method: Method, path: &str, params: &BTreeMap<String, QueryValue>) -> Self {
        let params = params
            .iter()
            .filter_map(|(name, value)| {
                let rendered = value.to_query_string()?;
                Some((name.clone(), type_tag(value), rendered))
            })
            .collect();

        Self {
            method,
            path: path.to_string(),
            params,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn type_tag(value: &QueryValue) -> char {
    match value {
        QueryValue::String(_) => 's',
        QueryValue::Integer(_) => 'i',
        QueryValue::Float(_) => 'f',
        QueryValue::Bool(_) => 'b',
        QueryValue::Null => 'n',
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)?;
        for (index, (name, tag, value)) in self.params.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(f, "{}{}={}:{}", separator, name, tag, value)?;
        }
        Ok(())
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

impl<V> Drop for Entry<V> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct State<K: Hash + Eq, V> {
    // Entries are only ever read with `peek`, so LRU order is insertion order.
    entries: LruCache<K, Entry<V>>,
    max_size: usize,
    next_generation: u64,
}

/// TTL cache with insertion-ordered eviction.
///
/// Cheap to clone; clones share entries.
pub struct TtlCache<K: Hash + Eq, V> {
    state: Arc<Mutex<State<K, V>>>,
}

impl<K: Hash + Eq, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

fn lock<K: Hash + Eq, V>(state: &Mutex<State<K, V>>) -> MutexGuard<'_, State<K, V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: LruCache::unbounded(),
                max_size,
                next_generation: 0,
            })),
        }
    }

    /// Returns the value if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = lock(&self.state);
        let expired = match state.entries.peek(key) {
            None => {
                trace!(?key, "Cache miss");
                return None;
            }
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                trace!(?key, "Cache hit");
                return Some(entry.value.clone());
            }
        };

        if expired {
            debug!(?key, "Evicting expired cache entry");
            state.entries.pop(key);
        }
        None
    }

    /// Stores `value` for `ttl`.
    ///
    /// Replacing an existing key restarts its timer and makes it the newest
    /// entry. A cache with `max_size` zero stores nothing.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut state = lock(&self.state);
        if state.max_size == 0 {
            return;
        }

        state.entries.pop(&key);
        while state.entries.len() >= state.max_size {
            if let Some((evicted, _)) = state.entries.pop_lru() {
                debug!(key = ?evicted, "Evicting oldest cache entry");
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let timer = self.spawn_expiry(key.clone(), generation, ttl);

        state.entries.push(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
                generation,
                timer,
            },
        );
    }

    fn spawn_expiry(&self, key: K, generation: u64, ttl: Duration) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let state: Weak<Mutex<State<K, V>>> = Arc::downgrade(&self.state);

        Some(handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = lock(&state);
            let current = state
                .entries
                .peek(&key)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                trace!(?key, "Cache entry expired");
                if let Some(mut entry) = state.entries.pop(&key) {
                    // Running inside this timer; nothing to abort.
                    entry.timer = None;
                }
            }
        }))
    }

    /// Whether a non-expired entry exists.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &K) -> bool {
        lock(&self.state).entries.pop(key).is_some()
    }

    /// Removes every entry whose key matches `predicate`. Returns the count.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut state = lock(&self.state);
        let doomed: Vec<K> = state
            .entries
            .iter()
            .filter(|(key, _)| predicate(*key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            state.entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        let count = state.entries.len();
        state.entries.clear();
        debug!(count, "Cache cleared");
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        lock(&self.state).max_size
    }

    /// Changes the capacity, evicting the oldest entries down to it.
    pub fn set_max_size(&self, max_size: usize) {
        let mut state = lock(&self.state);
        state.max_size = max_size;
        while state.entries.len() > max_size {
            if let Some((evicted, _)) = state.entries.pop_lru() {
                debug!(key = ?evicted, "Evicting cache entry over capacity");
            }
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("TtlCache")
            .field("len", &state.entries.len())
            .field("max_size", &state.max_size)
            .finish()
    }
}
