pub mod schema;

pub use schema::{Config, DispatcherConfig, JobConfig, LogConfig, QueueConfig, SchedulerConfig};

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("Invalid dirsync config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("In {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            bail!("queue.capacity must be at least 1");
        }
        if self.dispatcher.max_in_flight == 0 {
            bail!("dispatcher.max_in_flight must be at least 1");
        }
        if self.scheduler.tick_secs == 0 {
            bail!("scheduler.tick_secs must be at least 1");
        }

        let mut seen = HashSet::new();
        for job in &self.scheduler.jobs {
            if !seen.insert(job.category) {
                bail!("Duplicate scheduler job for category '{}'", job.category);
            }
            // The tick must fire more often than the interval it guards.
            if job.interval_secs <= self.scheduler.tick_secs {
                bail!(
                    "Job '{}' interval ({}s) must be longer than scheduler.tick_secs ({}s)",
                    job.category,
                    job.interval_secs,
                    self.scheduler.tick_secs
                );
            }
        }
        Ok(())
    }

    /// Configured database path, or `<data dir>/dirsync/mirror.db`.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            let expanded = path.to_string_lossy();
            if let Some(rest) = expanded.strip_prefix("~/") {
                let dirs = directories::BaseDirs::new()
                    .context("Cannot resolve home directory for database_path")?;
                return Ok(dirs.home_dir().join(rest));
            }
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("", "", "dirsync")
            .context("Cannot resolve a data directory for the mirror database")?;
        Ok(dirs.data_dir().join("mirror.db"))
    }

    /// JSON Schema of the config file, for editor tooling and docs.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}
