use std::time::Instant;

use crate::error::Result;

/// The unit of caching for a single key.
///
/// Implementations own whatever state they need to load their value from a backing source.
/// The [`Throttle`](crate::Throttle) only ever calls these methods while holding its lock, so
/// they are never invoked concurrently on the same entry.
pub trait Cache<V>: Send {
    /// Returns the currently loaded value, or `None` if nothing was loaded yet or the entry
    /// was released.
    fn get(&self) -> Option<V>;

    /// (Re)loads the value from the backing source, replacing any previously loaded value.
    fn reload(&mut self) -> Result<()>;

    /// Tells whether the backing source changed since the last successful
    /// [`reload`](Self::reload), without reloading.
    fn updated(&mut self) -> Result<bool>;

    /// Overwrites the in-memory value, persisting it to the backing source if supported.
    fn replace(&mut self, value: V) -> Result<()>;

    /// Releases all resources and clears the value. Calling this more than once is a no-op.
    fn release(&mut self);

    /// Tells the sweeper whether this entry outlived its deadline at `now`.
    ///
    /// Entries do not expire on their own; see [`ExpiringEntry`](crate::ExpiringEntry).
    fn is_expired(&self, now: Instant) -> bool {
        let _ = now;
        false
    }
}

/// Constructs, but does not load, the entry for a key.
pub trait Factory<K, V>: Send + Sync + 'static {
    fn create(&self, key: &K) -> Result<Box<dyn Cache<V>>>;
}

impl<K, V, F> Factory<K, V> for F
where
    F: Fn(&K) -> Result<Box<dyn Cache<V>>> + Send + Sync + 'static,
{
    fn create(&self, key: &K) -> Result<Box<dyn Cache<V>>> {
        self(key)
    }
}

/// A plain in-memory entry with a caller supplied loader.
///
/// The loader runs on every [`reload`](Cache::reload). The entry never reports itself as
/// updated, so it is only reloaded when it is created.
pub struct MemoryEntry<V, L> {
    value: Option<V>,
    loader: L,
}

impl<V, L> MemoryEntry<V, L>
where
    L: FnMut() -> Result<V>,
{
    pub fn new(loader: L) -> Self {
        Self {
            value: None,
            loader,
        }
    }
}

impl<V, L> Cache<V> for MemoryEntry<V, L>
where
    V: Clone + Send,
    L: FnMut() -> Result<V> + Send,
{
    fn get(&self) -> Option<V> {
        self.value.clone()
    }

    fn reload(&mut self) -> Result<()> {
        self.value = Some((self.loader)()?);
        Ok(())
    }

    fn updated(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn replace(&mut self, value: V) -> Result<()> {
        self.value = Some(value);
        Ok(())
    }

    fn release(&mut self) {
        self.value = None;
    }
}
