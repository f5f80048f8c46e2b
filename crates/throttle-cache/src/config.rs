use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

use crate::sweeper::{Sweeper, DEFAULT_EXPIRY, DEFAULT_INTERVAL};

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the cache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "throttle_cache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Configures time based expiration.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SweeperConfig {
    /// Whether entries expire at all.
    pub enabled: bool,
    /// Time between two sweeps.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Time an entry lives before it is swept.
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
    /// Fix deadlines at creation, instead of postponing them on every access.
    pub punctual: bool,
    /// Sweep all throttles in parallel instead of one after the other.
    pub concurrent: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_INTERVAL,
            expiry: DEFAULT_EXPIRY,
            punctual: false,
            concurrent: false,
        }
    }
}

impl SweeperConfig {
    /// Starts a [`Sweeper`], or returns a disabled one if expiration is turned off.
    ///
    /// # Errors
    ///
    /// Fails if expiration is enabled and this is called outside of a tokio runtime.
    pub fn build(&self) -> crate::Result<Sweeper> {
        if self.enabled {
            Sweeper::new(self)
        } else {
            Ok(Sweeper::disabled())
        }
    }
}

/// What [`Throttle::replace`](crate::Throttle::replace) does with keys that are not cached.
#[derive(Debug, Clone, Copy, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReplacePolicy {
    /// Fail with a "not found" error.
    #[default]
    Reject,
    /// Create the entry and install the value without loading it first.
    Create,
}

/// Configures a [`Throttle`](crate::Throttle).
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum number of cached keys.
    pub capacity: usize,
    pub replace_policy: ReplacePolicy,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            replace_policy: ReplacePolicy::Reject,
        }
    }
}

/// Configures file backed entries.
#[derive(Debug, Clone, Copy, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Check files for modifications at most this often. Unset checks on every access.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Time based expiration.
    pub sweeper: SweeperConfig,

    /// Capacity based eviction.
    pub throttle: ThrottleConfig,

    /// File backed entries.
    pub file: FileConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
