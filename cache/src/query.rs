use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use trace::RequestContext;

const EMPTY: u8 = 0;
const PENDING: u8 = 1;
const AVAILABLE: u8 = 2;

/// Outcome of [`QueryItem::fetch_or_lock`].
#[derive(Debug)]
pub enum Lookup<V> {
    /// The value is available.
    Hit(Arc<V>),
    /// The caller won the Empty -> Pending race and must eventually call
    /// [`QueryItem::store_and_unlock`] or [`QueryItem::store_abort`].
    Leader,
    /// The caller's context finished first; give up without becoming leader.
    TimedOut,
    /// The leader aborted; treat as a miss.
    Aborted,
}

/// One single-flight slot.
///
/// State machine: Empty -> (CAS by the leader) Pending -> Available, or back
/// to Empty when the leader aborts. At most one writer ever holds Pending.
/// Followers wait on a finished signal which the leader fires exactly once
/// per epoch; aborting installs a fresh signal so the next caller can lead.
#[derive(Debug)]
pub struct QueryItem<V> {
    key: String,
    data: RwLock<Option<Arc<V>>>,
    flags: AtomicU8,
    finished: Mutex<CancellationToken>,
    /// Size accounting of the owning [`QueryCache`]; a shared handle, not a
    /// back-reference, so the cache stays sole owner of its items.
    total_size: Arc<AtomicU64>,
    accounted: AtomicU64,
}

impl<V> QueryItem<V>
where
    V: Send + Sync,
{
    fn new(key: String, total_size: Arc<AtomicU64>) -> Self {
        Self {
            key,
            data: RwLock::new(None),
            flags: AtomicU8::new(EMPTY),
            finished: Mutex::new(CancellationToken::new()),
            total_size,
            accounted: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the stored value, become the leader, or wait for the current
    /// leader, whichever the state machine dictates.
    pub async fn fetch_or_lock(&self, ctx: &RequestContext) -> Lookup<V> {
        if let Some(data) = self.data.read().clone() {
            return Lookup::Hit(data);
        }

        if self
            .flags
            .compare_exchange(EMPTY, PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Lookup::Leader;
        }

        let finished = self.finished.lock().clone();
        tokio::select! {
            _ = ctx.done() => Lookup::TimedOut,
            _ = finished.cancelled() => match self.data.read().clone() {
                Some(data) => Lookup::Hit(data),
                None => Lookup::Aborted,
            },
        }
    }

    /// Leader path: publish the value and wake every waiter.
    pub fn store_and_unlock(&self, value: V, size: u64) {
        *self.data.write() = Some(Arc::new(value));
        self.flags.store(AVAILABLE, Ordering::Release);
        self.accounted.store(size, Ordering::Relaxed);
        self.total_size.fetch_add(size, Ordering::Relaxed);
        self.finished.lock().cancel();
    }

    /// Leader path: give the slot up without a value.
    ///
    /// Wakes current waiters (they observe the abort) and installs a fresh
    /// finished signal so a later caller can become the next leader. A no-op
    /// once a value is stored, which lets callers run it unconditionally on
    /// exit.
    pub fn store_abort(&self) {
        if self.data.read().is_some() {
            return;
        }

        self.flags.store(EMPTY, Ordering::Release);
        let mut finished = self.finished.lock();
        let previous = std::mem::replace(&mut *finished, CancellationToken::new());
        previous.cancel();
    }

    /// RAII wrapper around [`QueryItem::store_abort`] for leader early
    /// returns; the pending state cannot outlive the guard.
    pub fn abort_guard(self: &Arc<Self>) -> AbortGuard<V> {
        AbortGuard {
            item: Arc::clone(self),
        }
    }

    fn release_accounting(&self) {
        let accounted = self.accounted.swap(0, Ordering::Relaxed);
        if accounted > 0 {
            self.total_size.fetch_sub(accounted, Ordering::Relaxed);
        }
    }
}

/// Runs `store_abort` on drop; harmless after a successful store.
#[derive(Debug)]
pub struct AbortGuard<V>
where
    V: Send + Sync,
{
    item: Arc<QueryItem<V>>,
}

impl<V> Drop for AbortGuard<V>
where
    V: Send + Sync,
{
    fn drop(&mut self) {
        self.item.store_abort()
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    item: Arc<QueryItem<V>>,
    expires_at: Instant,
}

/// An expiring, size-bounded store of [`QueryItem`]s.
///
/// `get_query_item` has get-or-insert semantics: every concurrent caller for
/// one key sees the same item, which is what makes the single-flight
/// protocol work. Size accounting only counts stored values; eviction of an
/// entry releases its share. When the accounted total exceeds the
/// configured bound, live entries are dropped in arbitrary order until it
/// fits again, matching the approximate discipline of an expire-cache.
#[derive(Debug)]
pub struct QueryCache<V> {
    inner: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    max_size: u64,
    total_size: Arc<AtomicU64>,
}

impl<V> QueryCache<V>
where
    V: Send + Sync,
{
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            max_size,
            total_size: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The item for `key`, creating an empty one if the key is missing or
    /// its entry has expired.
    pub fn get_query_item(&self, key: &str) -> Arc<QueryItem<V>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.get(key) {
            if entry.expires_at > now {
                return Arc::clone(&entry.item);
            }
        }

        self.shrink_locked(&mut inner, now);

        let item = Arc::new(QueryItem::new(
            key.to_owned(),
            Arc::clone(&self.total_size),
        ));
        inner.insert(
            key.to_owned(),
            CacheEntry {
                item: Arc::clone(&item),
                expires_at: now + self.ttl,
            },
        );

        item
    }

    /// Bytes accounted for stored values.
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn shrink_locked(&self, inner: &mut HashMap<String, CacheEntry<V>>, now: Instant) {
        inner.retain(|_, entry| {
            if entry.expires_at <= now {
                entry.item.release_accounting();
                false
            } else {
                true
            }
        });

        while self.total_size.load(Ordering::Relaxed) > self.max_size {
            let Some(key) = inner.keys().next().cloned() else {
                break;
            };
            if let Some(entry) = inner.remove(&key) {
                entry.item.release_accounting();
            }
        }
    }
}
