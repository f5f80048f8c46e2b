//! Helpers for testing caches and throttles.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test, since the directory is deleted when it is dropped. Assign it
//!    to a variable in the test function (e.g. `let dir = test::tempdir()`).

use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `throttle_cache` crate and mutes
///    all others.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("throttle_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Moves the modification time of `path` past any earlier one.
///
/// Writes in quick succession can share a timestamp on file systems with coarse mtime
/// resolution, which would hide them from modification checks.
pub fn bump_mtime(path: &Path) {
    let previous = std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mtime = (SystemTime::now() + Duration::from_secs(10)).max(previous + Duration::from_secs(1));
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
}
