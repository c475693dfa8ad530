//! Scheduling options shared by destinations and their actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interval applied when none is configured.
pub const DEFAULT_INTERVAL: &str = "@every 1h";

/// Retry budget applied when none is configured.
pub const DEFAULT_MAX_RETRIES: u16 = 72;

/// How and when the scheduler loads jobs of a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Load through the realtime pubsub path instead of the interval.
    #[serde(default)]
    pub realtime: bool,
    /// Interval or CRON expression between loads and retries.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Maximum number of retries before a job is discarded.
    #[serde(default = "default_max_retries")]
    pub max_retries: u16,
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

fn default_max_retries() -> u16 {
    DEFAULT_MAX_RETRIES
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            realtime: false,
            interval: default_interval(),
            max_retries: default_max_retries(),
        }
    }
}

impl Schedule {
    /// Creates a schedule with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the realtime flag.
    #[must_use]
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Sets the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u16) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replaces zero values with the defaults.
    pub fn fill_defaults(&mut self) {
        if self.interval.is_empty() {
            self.interval = default_interval();
        }
        if self.max_retries == 0 {
            self.max_retries = default_max_retries();
        }
    }
}

/// Options shared by every action of a destination unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationOptions {
    /// Schedule applied to actions without their own.
    pub default_schedule: Schedule,
    /// Payload version stamped on new jobs, for versioned destinations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_version: Option<String>,
    /// Known payload versions and when they were introduced.
    #[serde(default)]
    pub versions: BTreeMap<String, DateTime<Utc>>,
}

impl DestinationOptions {
    /// Creates options for an unversioned destination.
    #[must_use]
    pub fn unversioned(schedule: Schedule) -> Self {
        Self {
            default_schedule: schedule,
            default_version: None,
            versions: BTreeMap::new(),
        }
    }

    /// Creates options for a destination with a single payload version.
    #[must_use]
    pub fn versioned(schedule: Schedule, version: &str) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(version.to_string(), DateTime::<Utc>::UNIX_EPOCH);
        Self {
            default_schedule: schedule,
            default_version: Some(version.to_string()),
            versions,
        }
    }

    /// Returns true if the version is known to this destination.
    #[must_use]
    pub fn supports_version(&self, version: Option<&str>) -> bool {
        match (version, &self.default_version) {
            (None, None) => true,
            (Some(v), _) => self.versions.contains_key(v),
            (None, Some(_)) => false,
        }
    }
}
