use crate::directory::models::SyncCategory;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ── Top level ───────────────────────────────────────────────────

/// Engine configuration, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub dispatcher: DispatcherConfig,
    /// Run a full sync of every category right after connecting.
    pub full_sync_on_connect: bool,
    /// Mirror database location. Defaults to the platform data dir.
    pub database_path: Option<PathBuf>,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            full_sync_on_connect: true,
            database_path: None,
            log: LogConfig::default(),
        }
    }
}

// ── Fetch queue ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QueueConfig {
    /// Courtesy pause between two remote calls, in milliseconds.
    pub min_delay_ms: u64,
    /// Slots in the request channel; submitters wait when it is full.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            capacity: 256,
        }
    }
}

impl QueueConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

// ── Scheduler ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often each job re-checks whether its interval has elapsed.
    pub tick_secs: u64,
    pub jobs: Vec<JobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            jobs: default_jobs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobConfig {
    pub category: SyncCategory,
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl JobConfig {
    pub fn new(category: SyncCategory, interval_secs: u64) -> Self {
        Self {
            category,
            interval_secs,
            enabled: true,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_true() -> bool {
    true
}

const HOUR: u64 = 60 * 60;

/// Block list hourly, pictures and group rosters every 6h, the rest daily.
pub fn default_jobs() -> Vec<JobConfig> {
    vec![
        JobConfig::new(SyncCategory::BlockList, HOUR),
        JobConfig::new(SyncCategory::ContactPictures, 6 * HOUR),
        JobConfig::new(SyncCategory::Groups, 6 * HOUR),
        JobConfig::new(SyncCategory::GroupPictures, 6 * HOUR),
        JobConfig::new(SyncCategory::Channels, 24 * HOUR),
        JobConfig::new(SyncCategory::ChannelPictures, 24 * HOUR),
        JobConfig::new(SyncCategory::Privacy, 24 * HOUR),
    ]
}

// ── Dispatcher ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Sync-intent tasks allowed to run at once; the rest wait for a slot.
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_in_flight: 64 }
    }
}

// ── Logging ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` env-filter directive, overridden by `RUST_LOG` when set.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            ansi: true,
        }
    }
}
