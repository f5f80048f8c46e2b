//! The bounded, recency ordered cache manager.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::{ReplacePolicy, ThrottleConfig};
use crate::entry::{Cache, Factory};
use crate::error::{Error, Op, Result};
use crate::recency::Recency;
use crate::sweeper::{Sweep, Sweeper};

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    /// Pushed out by a more recently used key.
    Capacity,
    /// Its deadline passed.
    Expired,
    /// Checking or reloading it failed.
    Failed,
}

impl Eviction {
    fn as_str(&self) -> &'static str {
        match self {
            Eviction::Capacity => "capacity",
            Eviction::Expired => "expired",
            Eviction::Failed => "failed",
        }
    }
}

struct Slot<V> {
    entry: Box<dyn Cache<V>>,
    /// Whether a `reload` of this entry ever succeeded.
    loaded: bool,
}

/// The key to entry map and the recency list, which always hold the same set of keys.
struct State<K, V> {
    entries: HashMap<K, Slot<V>>,
    recency: Recency<K>,
}

impl<K, V> State<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    /// Inserts a new entry in front of the recency list, evicting the least recently used
    /// entry if the cache is full.
    fn insert(&mut self, key: K, slot: Slot<V>) {
        self.shift(&key);
        self.entries.insert(key, slot);
        debug_assert_eq!(self.entries.len(), self.recency.len());
        self.report_size();
    }

    /// Moves `key` to the front of the recency list.
    fn shift(&mut self, key: &K) {
        if let Some(evicted) = self.recency.touch(key.clone()) {
            if let Some(mut slot) = self.entries.remove(&evicted) {
                slot.entry.release();
            }
            record_eviction(&evicted, Eviction::Capacity);
        }
    }

    /// Releases the entry for `key` and removes it from both structures.
    fn terminate(&mut self, key: &K, reason: Eviction) {
        self.recency.remove(key);
        if let Some(mut slot) = self.entries.remove(key) {
            slot.entry.release();
            record_eviction(key, reason);
        }
        self.report_size();
    }

    fn terminate_all(&mut self) {
        for (_, mut slot) in self.entries.drain() {
            slot.entry.release();
        }
        self.recency.clear();
        self.report_size();
    }

    fn report_size(&self) {
        metric!(gauge("throttle.entries") = self.entries.len() as u64);
    }
}

/// Reloads `entry`, timing how long loading its backing source takes.
fn load<V>(entry: &mut Box<dyn Cache<V>>) -> Result<()> {
    let start = Instant::now();
    let result = entry.reload();
    metric!(
        timer("throttle.load") = start.elapsed(),
        "status" => if result.is_ok() { "ok" } else { "failed" },
    );
    result
}

fn record_eviction<K: fmt::Debug>(key: &K, reason: Eviction) {
    metric!(counter("throttle.evict") += 1, "reason" => reason.as_str());
    tracing::debug!(key = ?key, reason = reason.as_str(), "Evicted cache entry");
}

struct ThrottleInner<K, V> {
    factory: Box<dyn Factory<K, V>>,
    state: Mutex<State<K, V>>,
    sweeper: Sweeper,
    replace_policy: ReplacePolicy,
}

impl<K, V> ThrottleInner<K, V> {
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> Sweep for ThrottleInner<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
    V: Send + 'static,
{
    fn sweep(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.terminate(key, Eviction::Expired);
        }
        expired.len()
    }

    fn terminate_all(&self) {
        self.lock().terminate_all();
    }
}

/// A bounded cache of lazily loaded entries.
///
/// Entries are created on the first [`get`](Self::get) of their key through the configured
/// [`Factory`], and are asked on every subsequent `get` whether their backing source changed,
/// in which case they are reloaded. When the cache is full, the least recently used key is
/// evicted. If a [`Sweeper`] is configured, entries are additionally evicted once they expire.
///
/// All operations are serialized by a single lock per throttle, which is also held while
/// entries load. A slow load thus blocks other callers of the same throttle, but not of
/// other throttles.
///
/// The handle is cheap to clone; all clones share the same entries.
pub struct Throttle<K, V> {
    inner: Arc<ThrottleInner<K, V>>,
}

impl<K, V> Clone for Throttle<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Throttle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .state
            .try_lock()
            .map(|state| state.entries.len())
            .unwrap_or_default();
        f.debug_struct("Throttle")
            .field("entries", &entries)
            .field("sweeper", &self.inner.sweeper)
            .field("replace_policy", &self.inner.replace_policy)
            .finish()
    }
}

/// Builds a [`Throttle`] with non-default settings.
pub struct ThrottleBuilder<K, V> {
    factory: Box<dyn Factory<K, V>>,
    config: ThrottleConfig,
    sweeper: Sweeper,
}

impl<K, V> ThrottleBuilder<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    /// The maximum number of cached keys, at least one.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Expires entries with the given sweeper. Entries do not expire by default.
    pub fn sweeper(mut self, sweeper: Sweeper) -> Self {
        self.sweeper = sweeper;
        self
    }

    pub fn replace_policy(mut self, replace_policy: ReplacePolicy) -> Self {
        self.config.replace_policy = replace_policy;
        self
    }

    pub fn config(mut self, config: ThrottleConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates the throttle and registers it with its sweeper.
    pub fn build(self) -> Throttle<K, V> {
        let inner = Arc::new(ThrottleInner {
            factory: self.factory,
            state: Mutex::new(State {
                entries: HashMap::new(),
                recency: Recency::new(self.config.capacity),
            }),
            sweeper: self.sweeper,
            replace_policy: self.config.replace_policy,
        });

        let weak = Arc::downgrade(&inner);
        inner.sweeper.register(weak);

        Throttle { inner }
    }
}

impl<K, V> Throttle<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates a throttle holding at most `capacity` keys, expiring entries with `sweeper`.
    pub fn new<F>(factory: F, capacity: usize, sweeper: Sweeper) -> Self
    where
        F: Factory<K, V>,
    {
        Self::builder(factory)
            .capacity(capacity)
            .sweeper(sweeper)
            .build()
    }

    pub fn builder<F>(factory: F) -> ThrottleBuilder<K, V>
    where
        F: Factory<K, V>,
    {
        ThrottleBuilder {
            factory: Box::new(factory),
            config: ThrottleConfig::default(),
            sweeper: Sweeper::disabled(),
        }
    }

    /// Returns the value for `key`, loading or reloading it as necessary.
    ///
    /// # Errors
    ///
    /// - Errors of the factory are returned as is, and nothing is cached.
    /// - If the initial load of an entry fails, its error is returned as is. The entry stays
    ///   cached, and its load is retried by the next `get` of the same key.
    /// - If checking a cached entry for updates fails, the entry is evicted and the error is
    ///   returned tagged with [`Op::Update`].
    /// - If reloading an updated entry fails, the entry is evicted and the error is returned
    ///   tagged with [`Op::Reload`].
    pub fn get(&self, key: &K) -> Result<V> {
        metric!(counter("throttle.access") += 1);
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        if let Some(slot) = state.entries.get(key) {
            if slot.entry.is_expired(Instant::now()) {
                state.terminate(key, Eviction::Expired);
            }
        }

        let Some(slot) = state.entries.get_mut(key) else {
            metric!(counter("throttle.miss") += 1);
            return self.create(state, key);
        };
        metric!(counter("throttle.hit") += 1);

        if !slot.loaded {
            tracing::trace!(key = ?key, "Retrying initial load");
            load(&mut slot.entry)?;
            slot.loaded = true;
        } else {
            match slot.entry.updated() {
                Err(err) => {
                    state.terminate(key, Eviction::Failed);
                    return Err(err.during(Op::Update));
                }
                Ok(true) => {
                    metric!(counter("throttle.reload") += 1);
                    if let Err(err) = load(&mut slot.entry) {
                        state.terminate(key, Eviction::Failed);
                        return Err(err.during(Op::Reload));
                    }
                }
                Ok(false) => {}
            }
        }

        let Some(value) = slot.entry.get() else {
            state.terminate(key, Eviction::Failed);
            return Err(Error::Expired);
        };
        state.shift(key);
        Ok(value)
    }

    /// Creates, caches and loads the entry for a missing key.
    fn create(&self, state: &mut State<K, V>, key: &K) -> Result<V> {
        let mut entry = self.inner.sweeper.touch(self.inner.factory.create(key)?);

        let loaded = load(&mut entry);
        let value = entry.get();
        state.insert(
            key.clone(),
            Slot {
                entry,
                loaded: loaded.is_ok(),
            },
        );

        if let Err(err) = loaded {
            tracing::debug!(key = ?key, error = &err as &dyn std::error::Error, "Failed to load cache entry");
            return Err(err);
        }
        value.ok_or(Error::Expired)
    }

    /// Replaces the value for `key`, persisting it if the entry supports that.
    ///
    /// What happens for keys that are not cached depends on the [`ReplacePolicy`]. By default
    /// they are rejected with an [`Error::NotFound`] tagged with [`Op::Replace`].
    ///
    /// Errors of the entry are tagged with [`Op::Replace`] as well. The entry stays cached with
    /// its previous value.
    pub fn replace(&self, key: &K, value: V) -> Result<()> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        if let Some(slot) = state.entries.get(key) {
            if slot.entry.is_expired(Instant::now()) {
                state.terminate(key, Eviction::Expired);
            }
        }

        match state.entries.get_mut(key) {
            Some(slot) => {
                slot.entry
                    .replace(value)
                    .map_err(|err| err.during(Op::Replace))?;
                slot.loaded = true;
                state.shift(key);
            }
            None => match self.inner.replace_policy {
                ReplacePolicy::Reject => {
                    let key = format!("{key:?}");
                    return Err(Error::NotFound { key }.during(Op::Replace));
                }
                ReplacePolicy::Create => {
                    let mut entry = self.inner.sweeper.touch(self.inner.factory.create(key)?);
                    entry
                        .replace(value)
                        .map_err(|err| err.during(Op::Replace))?;
                    state.insert(
                        key.clone(),
                        Slot {
                            entry,
                            loaded: true,
                        },
                    );
                }
            },
        }
        Ok(())
    }

    /// Releases all entries and empties the cache.
    pub fn terminate_all(&self) {
        self.inner.lock().terminate_all();
    }

    /// Evicts all expired entries right away, returning how many were evicted.
    pub fn sweep(&self) -> usize {
        self.inner.sweep(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().recency.capacity()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// The cached keys, from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().recency.keys().cloned().collect()
    }
}
