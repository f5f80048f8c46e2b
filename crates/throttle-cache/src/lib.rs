//! Bounded, lazily loaded caches with change detection and time based expiration.
//!
//! A [`Throttle`] maps keys to cache entries. Entries are created by a [`Factory`] on the first
//! access of their key, and implement the [`Cache`] trait to load their value from some backing
//! source. On every access, the throttle asks the entry whether its source changed and reloads
//! it if so. The throttle holds at most a fixed number of keys and evicts the least recently
//! used one when it is full.
//!
//! [`FileEntry`] caches the decoded contents of a file and reloads it when the file's
//! modification time changes. [`MemoryEntry`] caches whatever a closure returns.
//!
//! Entries can additionally expire after some time. A [`Sweeper`] wraps every entry into an
//! [`ExpiringEntry`] and periodically evicts the ones whose deadline passed, either a fixed time
//! after creation or after the last access.
//!
//! ```no_run
//! use std::io::Read;
//! use std::path::PathBuf;
//!
//! use throttle_cache::{FileFactory, Throttle};
//!
//! # fn main() -> throttle_cache::Result<()> {
//! let factory = FileFactory::new(|reader: &mut dyn Read| {
//!     let mut contents = String::new();
//!     reader.read_to_string(&mut contents)?;
//!     Ok(contents)
//! });
//! let throttle = Throttle::builder(factory).capacity(16).build();
//!
//! let contents = throttle.get(&PathBuf::from("/etc/hostname"))?;
//! # let _ = contents;
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod metrics;

pub mod config;
mod entry;
mod error;
mod expiring;
mod file;
pub mod logging;
mod recency;
mod sweeper;
mod throttle;

pub use config::{Config, FileConfig, ReplacePolicy, SweeperConfig, ThrottleConfig};
pub use entry::{Cache, Factory, MemoryEntry};
pub use error::{Error, Op, Result};
pub use expiring::{ExpiringEntry, Policy};
pub use file::{from_file, FileEntry, FileFactory, Marshal, Unmarshal};
pub use sweeper::{Sweeper, DEFAULT_EXPIRY, DEFAULT_INTERVAL};
pub use throttle::{Throttle, ThrottleBuilder};
