//! Time based expiration of cached entries.
//!
//! A [`Sweeper`] runs a background task on the tokio runtime that periodically scans all
//! [`Throttle`](crate::Throttle)s registered with it and evicts entries whose deadline has
//! passed. Entries get their deadline when the throttle creates them, by being wrapped into
//! an [`ExpiringEntry`] via [`Sweeper::touch`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::SweeperConfig;
use crate::entry::Cache;
use crate::error::Result;
use crate::expiring::{ExpiringEntry, Policy};

/// Default time between two sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Default time an entry lives before it can be swept.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// A manager whose entries can be swept.
pub(crate) trait Sweep: Send + Sync {
    /// Evicts all entries expired at `now`, returning how many were evicted.
    fn sweep(&self, now: Instant) -> usize;

    /// Releases and removes every entry.
    fn terminate_all(&self);
}

/// Handle to the background expiration task.
///
/// Cloning the handle is cheap and all clones refer to the same task. The task is stopped
/// with [`Sweeper::stop`], or as soon as the last handle is dropped.
///
/// [`Sweeper::disabled`] creates a handle that does not expire anything, which lets a
/// throttle treat "no expiration" the same as any other configuration.
#[derive(Clone, Default)]
pub struct Sweeper {
    inner: Option<Arc<SweeperInner>>,
}

struct SweeperInner {
    policy: Policy,
    interval: Duration,
    concurrent: bool,
    /// `None` once the sweeper was stopped.
    managers: Mutex<Option<Vec<Weak<dyn Sweep>>>>,
    token: CancellationToken,
    _drop_guard: DropGuard,
}

impl fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(inner) = &self.inner else {
            return f.write_str("Sweeper(disabled)");
        };
        f.debug_struct("Sweeper")
            .field("policy", &inner.policy)
            .field("interval", &inner.interval)
            .field("concurrent", &inner.concurrent)
            .field("stopped", &inner.token.is_cancelled())
            .finish()
    }
}

impl Sweeper {
    /// Starts a sweeper with the given configuration.
    ///
    /// A zero `interval` falls back to [`DEFAULT_INTERVAL`]. The `expiry` is used as is, so a
    /// zero expiry makes entries eligible for sweeping right after they were created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`](crate::Error::NoRuntime) if called outside of a tokio runtime.
    pub fn new(config: &SweeperConfig) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let interval = if config.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            config.interval
        };
        let token = CancellationToken::new();

        let inner = Arc::new(SweeperInner {
            policy: Policy {
                expiry: config.expiry,
                punctual: config.punctual,
            },
            interval,
            concurrent: config.concurrent,
            managers: Mutex::new(Some(Vec::new())),
            token: token.clone(),
            _drop_guard: token.clone().drop_guard(),
        });

        runtime.spawn(run(Arc::downgrade(&inner), token, interval));
        tracing::debug!(
            interval = ?interval,
            expiry = ?config.expiry,
            punctual = config.punctual,
            concurrent = config.concurrent,
            "Started sweeper"
        );

        Ok(Self { inner: Some(inner) })
    }

    /// A sweeper that never expires anything.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// The expiration policy applied by [`touch`](Self::touch), `None` when disabled.
    pub fn policy(&self) -> Option<Policy> {
        self.inner.as_ref().map(|inner| inner.policy)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.token.is_cancelled())
    }

    /// Wraps a freshly created entry so that it expires according to this sweeper's policy.
    ///
    /// A disabled sweeper returns the entry unchanged.
    pub fn touch<V: 'static>(&self, entry: Box<dyn Cache<V>>) -> Box<dyn Cache<V>> {
        match &self.inner {
            Some(inner) => Box::new(ExpiringEntry::new(entry, inner.policy)),
            None => entry,
        }
    }

    /// Stops sweeping and releases every entry of every registered throttle.
    ///
    /// This is irreversible. Calling it again does nothing.
    pub fn stop(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        let Some(managers) = inner.managers().take() else {
            tracing::warn!("Sweeper was already stopped");
            return;
        };
        inner.token.cancel();

        let managers: Vec<_> = managers.iter().filter_map(Weak::upgrade).collect();
        for manager in &managers {
            manager.terminate_all();
        }
        tracing::debug!(managers = managers.len(), "Stopped sweeper");
    }

    /// Registers a throttle to be swept.
    ///
    /// Only a weak reference is kept, dropped throttles are forgotten on the next sweep.
    pub(crate) fn register(&self, manager: Weak<dyn Sweep>) {
        let Some(inner) = &self.inner else {
            return;
        };
        match inner.managers().as_mut() {
            Some(managers) => managers.push(manager),
            None => tracing::warn!("Registered a throttle with a stopped sweeper"),
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| {
            inner
                .managers()
                .as_ref()
                .map_or(0, |managers| managers.iter().filter(|m| m.strong_count() > 0).count())
        })
    }
}

impl SweeperInner {
    fn managers(&self) -> MutexGuard<'_, Option<Vec<Weak<dyn Sweep>>>> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns all live managers, forgetting the ones that were dropped.
    fn live_managers(&self) -> Vec<Arc<dyn Sweep>> {
        let mut managers = self.managers();
        let Some(managers) = managers.as_mut() else {
            return Vec::new();
        };
        managers.retain(|manager| manager.strong_count() > 0);
        managers.iter().filter_map(Weak::upgrade).collect()
    }

    async fn sweep_all(&self) {
        let managers = self.live_managers();
        metric!(counter("sweeper.sweep") += 1);
        tracing::trace!(managers = managers.len(), "Sweeping");

        for manager in managers {
            if self.token.is_cancelled() {
                break;
            }
            let task = tokio::task::spawn_blocking(move || sweep_manager(&*manager));
            if self.concurrent {
                continue;
            }
            if let Err(e) = task.await {
                tracing::error!(error = &e as &dyn std::error::Error, "Sweep task failed");
            }
        }
    }
}

fn sweep_manager(manager: &dyn Sweep) {
    let expired = manager.sweep(Instant::now());
    if expired > 0 {
        metric!(counter("sweeper.expired") += expired as i64);
        tracing::debug!(expired, "Swept expired entries");
    }
}

async fn run(sweeper: Weak<SweeperInner>, token: CancellationToken, interval: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(sweeper) = sweeper.upgrade() else {
            break;
        };
        sweeper.sweep_all().await;
    }
    tracing::trace!("Sweeper task finished");
}
