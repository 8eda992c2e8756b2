use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// How many writes go by between amortized sweeps of expired entries.
const SWEEP_INTERVAL: usize = 128;

/// A concurrent map whose entries expire after a fixed TTL.
///
/// Expiry is lazy: a read past the entry's deadline behaves as a miss, and
/// every [`SWEEP_INTERVAL`]-th write walks the map and drops dead entries so
/// an idle key cannot pin memory forever. Readers get a clone of the stored
/// value, never a reference into the map.
#[derive(Debug)]
pub struct ExpiringMap<K, V> {
    inner: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
    writes: AtomicUsize,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry.
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.read();
        let entry = inner.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    /// Insert or overwrite an entry with a fresh TTL.
    pub fn set(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        let mut inner = self.inner.write();
        inner.insert(key, Entry { value, expires_at });

        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            let now = Instant::now();
            inner.retain(|_, entry| entry.expires_at > now);
        }
    }

    /// Drop every expired entry now.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.write().retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries held, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// A TTL'd set; used for the leaf paths a backend has been observed to serve.
#[derive(Debug)]
pub struct ExpiringSet<K> {
    map: ExpiringMap<K, ()>,
}

impl<K> ExpiringSet<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: ExpiringMap::new(ttl),
        }
    }

    pub fn insert(&self, key: K) {
        self.map.set(key, ())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
