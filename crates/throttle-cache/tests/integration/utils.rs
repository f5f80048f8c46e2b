use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use throttle_cache::FileFactory;

pub use throttle_cache_test::{setup, tempdir};

/// A small settings document, stored as JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub name: String,
    pub retries: u32,
}

impl Settings {
    pub fn new(name: &str, retries: u32) -> Self {
        Self {
            name: name.to_owned(),
            retries,
        }
    }
}

pub fn read_settings(reader: &mut dyn Read) -> anyhow::Result<Settings> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_settings(settings: &Settings, writer: &mut dyn Write) -> anyhow::Result<()> {
    serde_json::to_writer(writer, settings)?;
    Ok(())
}

/// A factory reading and persisting [`Settings`] files.
pub fn settings_factory() -> FileFactory<Settings> {
    FileFactory::new(read_settings).with_marshal(write_settings)
}

/// Writes `settings` to `path`, making sure the modification time differs from any earlier
/// write even on file systems with coarse timestamps.
pub fn store(path: &Path, settings: &Settings) {
    let previous = fs::metadata(path).and_then(|metadata| metadata.modified()).ok();
    fs::write(path, serde_json::to_vec(settings).unwrap()).unwrap();

    let mut mtime = SystemTime::now() + Duration::from_secs(10);
    if let Some(previous) = previous {
        mtime = mtime.max(previous + Duration::from_secs(1));
    }
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
}

pub fn load(path: &Path) -> Settings {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}
