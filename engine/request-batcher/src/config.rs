//! # Batcher Configuration
//!
//! Tick intervals, concurrency and summary chunking, loaded from TOML.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for one [`RequestBatcher`](crate::RequestBatcher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Time between ticks
    pub interval_ms: u64,
    /// Requests dispatched per tick
    pub concurrency: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self { interval_ms: 3000, concurrency: 1 }
    }
}

impl BatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(BatchError::config("interval_ms must be positive"));
        }
        if self.concurrency == 0 {
            return Err(BatchError::config("concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Settings for the summary-by-job-id batcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Job ids per outbound request
    pub chunk_size: usize,
    pub interval_ms: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { chunk_size: 5, interval_ms: 200 }
    }
}

impl SummaryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Batcher settings for summaries: one chunk in flight per tick
    pub fn batcher(&self) -> BatcherConfig {
        BatcherConfig { interval_ms: self.interval_ms, concurrency: 1 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BatchError::config("summary.chunk_size must be at least 1"));
        }
        self.batcher().validate()
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub batcher: BatcherConfig,
    pub summary: SummaryConfig,
}

impl SchedulerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BatchError::config(format!("reading {}: {e}", path.display())))?;
        let config: SchedulerConfig =
            toml::from_str(&content).map_err(|e| BatchError::config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| BatchError::config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| BatchError::config(format!("writing {}: {e}", path.as_ref().display())))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.batcher.validate()?;
        self.summary.validate()
    }
}
