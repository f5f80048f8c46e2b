//! A [`Cache`] entry backed by a file on disk.
//!
//! Staleness is detected by comparing the file's modification time with the one observed on
//! the last successful load. Because `stat` calls are not free, the check can optionally be
//! rate-limited to at most once per configured poll interval.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::entry::{Cache, Factory};
use crate::error::{Error, Op, Result};

/// Parses the persisted bytes of a file into an in-memory value.
pub type Unmarshal<V> = Arc<dyn Fn(&mut dyn Read) -> anyhow::Result<V> + Send + Sync>;

/// Serializes an in-memory value so it can be persisted to its file.
pub type Marshal<V> = Arc<dyn Fn(&V, &mut dyn Write) -> anyhow::Result<()> + Send + Sync>;

/// Creates [`FileEntry`]s keyed by their path.
pub struct FileFactory<V> {
    unmarshal: Unmarshal<V>,
    marshal: Option<Marshal<V>>,
    poll_interval: Option<Duration>,
}

impl<V> FileFactory<V> {
    pub fn new<U>(unmarshal: U) -> Self
    where
        U: Fn(&mut dyn Read) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        Self {
            unmarshal: Arc::new(unmarshal),
            marshal: None,
            poll_interval: None,
        }
    }

    /// Persists values passed to [`Cache::replace`] with the given function.
    ///
    /// Without a marshal function, replacing only changes the in-memory value.
    pub fn with_marshal<M>(mut self, marshal: M) -> Self
    where
        M: Fn(&V, &mut dyn Write) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.marshal = Some(Arc::new(marshal));
        self
    }

    /// Checks the file for modifications at most once per `interval`.
    ///
    /// A zero interval disables throttling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = (!interval.is_zero()).then_some(interval);
        self
    }
}

/// Creates a factory for file-backed entries.
pub fn from_file<V>(
    unmarshal: Unmarshal<V>,
    marshal: Option<Marshal<V>>,
    poll_interval: Option<Duration>,
) -> FileFactory<V> {
    FileFactory {
        unmarshal,
        marshal,
        poll_interval: poll_interval.filter(|interval| !interval.is_zero()),
    }
}

impl<V> Factory<PathBuf, V> for FileFactory<V>
where
    V: Clone + Send + 'static,
{
    fn create(&self, key: &PathBuf) -> Result<Box<dyn Cache<V>>> {
        Ok(Box::new(FileEntry {
            path: key.clone(),
            value: None,
            mod_time: None,
            unmarshal: Arc::clone(&self.unmarshal),
            marshal: self.marshal.clone(),
            poll: self.poll_interval.map(PollThrottle::new),
        }))
    }
}

/// Rate-limits modification checks to one per interval.
///
/// The next allowed check is kept as nanoseconds relative to `epoch` and is advanced with a
/// compare-and-swap, so concurrent callers race for a single check without taking a lock.
struct PollThrottle {
    interval: Duration,
    epoch: Instant,
    next_check: AtomicU64,
}

impl PollThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            epoch: Instant::now(),
            next_check: AtomicU64::new(0),
        }
    }

    fn should_check(&self) -> bool {
        let now = as_nanos(self.epoch.elapsed());
        let next = self.next_check.load(Ordering::Acquire);
        if now < next {
            return false;
        }
        let following = now.saturating_add(as_nanos(self.interval));
        self.next_check
            .compare_exchange(next, following, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// A cached value loaded from, and optionally persisted to, a single file.
pub struct FileEntry<V> {
    path: PathBuf,
    value: Option<V>,
    /// The modification time observed on the last successful load or persist.
    mod_time: Option<SystemTime>,
    unmarshal: Unmarshal<V>,
    marshal: Option<Marshal<V>>,
    poll: Option<PollThrottle>,
}

impl<V> fmt::Debug for FileEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("path", &self.path)
            .field("loaded", &self.value.is_some())
            .field("mod_time", &self.mod_time)
            .field("persistent", &self.marshal.is_some())
            .field("poll_interval", &self.poll.as_ref().map(|p| p.interval))
            .finish()
    }
}

impl<V> FileEntry<V> {
    fn load_error(&self, source: io::Error) -> Error {
        Error::Load {
            path: self.path.clone(),
            source,
        }
    }

    fn persist_error(&self, source: io::Error) -> Error {
        Error::Persist {
            path: self.path.clone(),
            source,
        }
    }

    /// Writes `value` next to the target and atomically moves it into place.
    ///
    /// Symlinks are resolved first so the file they point to is replaced, not the link, and the
    /// permissions of an existing file carry over to the new one.
    ///
    /// Returns the modification time of the written file.
    fn persist(&self, marshal: &Marshal<V>, value: &V) -> Result<SystemTime> {
        // the target may not exist yet, in which case it is created as named
        let target = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| self.persist_error(e))?;

        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            marshal(value, &mut writer).map_err(Error::Marshal)?;
            writer.flush().map_err(|e| self.persist_error(e))?;
        }

        if let Ok(metadata) = fs::metadata(&target) {
            temp_file
                .as_file()
                .set_permissions(metadata.permissions())
                .map_err(|e| self.persist_error(e))?;
        }

        let file = temp_file
            .persist(&target)
            .map_err(|e| self.persist_error(e.error))?;
        file.metadata()
            .and_then(|metadata| metadata.modified())
            .map_err(|e| self.persist_error(e))
    }
}

impl<V> Cache<V> for FileEntry<V>
where
    V: Clone + Send,
{
    fn get(&self) -> Option<V> {
        self.value.clone()
    }

    fn reload(&mut self) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| self.load_error(e))?;
        let value = (self.unmarshal)(&mut BufReader::new(&file)).map_err(Error::Unmarshal)?;
        let mod_time = file
            .metadata()
            .and_then(|metadata| metadata.modified())
            .map_err(|e| self.load_error(e))?;

        tracing::trace!(path = %self.path.display(), "Loaded file entry");
        self.value = Some(value);
        self.mod_time = Some(mod_time);
        Ok(())
    }

    fn updated(&mut self) -> Result<bool> {
        if let Some(poll) = &self.poll {
            if !poll.should_check() {
                return Ok(false);
            }
        }

        let mod_time = fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .map_err(|e| Error::Io(e).during(Op::CheckUpdate))?;
        Ok(self.mod_time != Some(mod_time))
    }

    fn replace(&mut self, value: V) -> Result<()> {
        if let Some(marshal) = &self.marshal {
            let mod_time = self.persist(marshal, &value)?;
            tracing::trace!(path = %self.path.display(), "Persisted file entry");
            self.mod_time = Some(mod_time);
        }
        self.value = Some(value);
        Ok(())
    }

    fn release(&mut self) {
        self.value = None;
        self.mod_time = None;
    }
}
