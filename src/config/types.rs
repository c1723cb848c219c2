use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use stowage_common::Error;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub tasks: TaskConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Per-owner and per-image ceilings. Negative values mean unlimited.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Bytes an owner may store across all images, counting every location.
    #[serde(default)]
    pub user_storage_quota: StorageQuota,

    /// Extra properties allowed on one image.
    #[serde(default = "default_count_quota")]
    pub image_property_quota: i64,

    /// Tags allowed on one image.
    #[serde(default = "default_count_quota")]
    pub image_tag_quota: i64,

    /// Members allowed on one image.
    #[serde(default = "default_count_quota")]
    pub image_member_quota: i64,
}

fn default_count_quota() -> i64 {
    128
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            user_storage_quota: StorageQuota::default(),
            image_property_quota: default_count_quota(),
            image_tag_quota: default_count_quota(),
            image_member_quota: default_count_quota(),
        }
    }
}

static STORAGE_QUOTA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+)((K|M|G|T)?B)?$").expect("valid storage quota regex"));

/// Storage ceiling in bytes.
///
/// Accepts a plain integer or a string such as `"10GB"` (binary multiples).
/// Negative means unlimited, zero means no storage at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStorageQuota", into = "i64")]
pub struct StorageQuota(i64);

impl StorageQuota {
    pub const UNLIMITED: StorageQuota = StorageQuota(-1);

    pub fn bytes(bytes: i64) -> Self {
        Self(bytes)
    }

    pub fn is_unlimited(&self) -> bool {
        self.0 < 0
    }

    /// The ceiling, or `None` when unlimited.
    pub fn limit(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }
}

impl Default for StorageQuota {
    fn default() -> Self {
        Self::UNLIMITED
    }
}

impl From<StorageQuota> for i64 {
    fn from(quota: StorageQuota) -> Self {
        quota.0
    }
}

impl fmt::Display for StorageQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            write!(f, "unlimited")
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

impl FromStr for StorageQuota {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidOption {
            option: "user_storage_quota".to_string(),
            value: s.to_string(),
        };

        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let caps = STORAGE_QUOTA_RE.captures(&compact).ok_or_else(invalid)?;

        let value: i64 = caps[1].parse().map_err(|_| invalid())?;
        if value < 0 {
            return Ok(Self::UNLIMITED);
        }

        let multiplier: i64 = match caps.get(3).map(|m| m.as_str()) {
            None => 1,
            Some("K") => 1 << 10,
            Some("M") => 1 << 20,
            Some("G") => 1 << 30,
            Some(_) => 1 << 40,
        };

        value.checked_mul(multiplier).map(Self).ok_or_else(invalid)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStorageQuota {
    Bytes(i64),
    Text(String),
}

impl TryFrom<RawStorageQuota> for StorageQuota {
    type Error = Error;

    fn try_from(raw: RawStorageQuota) -> Result<Self, Self::Error> {
        match raw {
            RawStorageQuota::Bytes(n) if n < 0 => Ok(Self::UNLIMITED),
            RawStorageQuota::Bytes(n) => Ok(Self(n)),
            RawStorageQuota::Text(s) => s.parse(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub strategy: NotifierStrategy,

    /// Stamped on every notification envelope.
    #[serde(default = "default_publisher_id")]
    pub publisher_id: String,

    /// Channel and history size for the `bus` strategy.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_publisher_id() -> String {
    "image.localhost".to_string()
}

fn default_bus_capacity() -> usize {
    256
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            strategy: NotifierStrategy::default(),
            publisher_id: default_publisher_id(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// Where notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum NotifierStrategy {
    /// Drop everything.
    #[default]
    Noop,
    /// Render as tracing events.
    Log,
    /// Publish on an in-process broadcast bus.
    Bus,
}

impl FromStr for NotifierStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noop" | "default" => Ok(Self::Noop),
            "log" | "logging" => Ok(Self::Log),
            "bus" => Ok(Self::Bus),
            _ => Err(Error::InvalidOption {
                option: "notifier.strategy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for NotifierStrategy {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NotifierStrategy> for String {
    fn from(strategy: NotifierStrategy) -> Self {
        strategy.to_string()
    }
}

impl fmt::Display for NotifierStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Log => write!(f, "log"),
            Self::Bus => write!(f, "bus"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// How long a finished task is kept before it expires.
    #[serde(default = "default_time_to_live_hours")]
    pub time_to_live_hours: i64,
}

fn default_time_to_live_hours() -> i64 {
    stowage_common::DEFAULT_TASK_TIME_TO_LIVE_HOURS
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            time_to_live_hours: default_time_to_live_hours(),
        }
    }
}

impl TaskConfig {
    pub fn time_to_live(&self) -> chrono::Duration {
        chrono::Duration::hours(self.time_to_live_hours)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stowage.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}
