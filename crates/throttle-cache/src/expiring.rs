use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};

use crate::entry::Cache;
use crate::error::{Error, Result};

/// How the deadline of an [`ExpiringEntry`] is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Time an entry may live past its creation (punctual) or last access (lazy).
    pub expiry: Duration,
    /// Fixes the deadline at creation instead of postponing it on every access.
    pub punctual: bool,
}

/// Wraps an entry with an expiration deadline.
///
/// Once the deadline passed or the entry was released, every operation short-circuits:
/// [`get`](Cache::get) yields `None`, the fallible methods return [`Error::Expired`] and
/// [`release`](Cache::release) does nothing.
///
/// Under the lazy policy, each successful `get` or `replace` moves the deadline to
/// `now + expiry`.
pub struct ExpiringEntry<V> {
    /// `None` once released; the wrapped entry is dropped at that point.
    inner: Option<Box<dyn Cache<V>>>,
    deadline: Cell<Instant>,
    policy: Policy,
}

impl<V> fmt::Debug for ExpiringEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringEntry")
            .field("released", &self.inner.is_none())
            .field("deadline", &self.deadline.get())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<V> ExpiringEntry<V> {
    pub fn new(inner: Box<dyn Cache<V>>, policy: Policy) -> Self {
        Self {
            inner: Some(inner),
            deadline: Cell::new(Instant::now() + policy.expiry),
            policy,
        }
    }

    /// The instant after which the entry is considered expired, `None` once released.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.as_ref().map(|_| self.deadline.get())
    }

    fn live(&self) -> Option<&dyn Cache<V>> {
        if self.is_expired(Instant::now()) {
            return None;
        }
        self.inner.as_deref()
    }

    fn live_mut(&mut self) -> Result<&mut Box<dyn Cache<V>>> {
        if self.is_expired(Instant::now()) {
            return Err(Error::Expired);
        }
        self.inner.as_mut().ok_or(Error::Expired)
    }

    fn postpone(&self) {
        if !self.policy.punctual {
            self.deadline.set(Instant::now() + self.policy.expiry);
        }
    }
}

impl<V> Cache<V> for ExpiringEntry<V> {
    fn get(&self) -> Option<V> {
        let value = self.live()?.get()?;
        self.postpone();
        Some(value)
    }

    fn reload(&mut self) -> Result<()> {
        self.live_mut()?.reload()
    }

    fn updated(&mut self) -> Result<bool> {
        self.live_mut()?.updated()
    }

    fn replace(&mut self, value: V) -> Result<()> {
        self.live_mut()?.replace(value)?;
        self.postpone();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.release();
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.inner.is_none() || now > self.deadline.get()
    }
}
