//! # Configuration Management
//!
//! Configuration structures for the battle analytics core.

use crate::candle::DAY_MS;
use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the analytics core
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Bucketing configuration for history series
    pub series: SeriesConfig,
    /// History projection configuration
    pub history: HistoryConfig,
    /// Range cache configuration
    pub cache: CacheConfig,
}

/// Bucketing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SeriesConfig {
    /// Bucket width in milliseconds
    pub bucket_duration_ms: i64,
    /// Maximum retained buckets (0 = unbounded)
    pub max_bucket_count: usize,
    /// Synthesize empty buckets between sparse observations
    pub fill_gaps: bool,
    /// Align buckets to multiples of the duration instead of the first observation
    pub fixed_grid: bool,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self { bucket_duration_ms: DAY_MS, max_bucket_count: 0, fill_gaps: true, fixed_grid: false }
    }
}

/// History projection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Skip buckets without observations in projected series
    pub ignore_empty_periods: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { ignore_empty_periods: true }
    }
}

/// Range cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Drop fetched snapshots whose start lies outside the requested range
    pub drop_out_of_range: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { drop_out_of_range: true }
    }
}

impl AnalyticsConfig {
    /// Load configuration from file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AnalyticsConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the bucketing engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.series.bucket_duration_ms <= 0 {
            return Err(AnalyticsError::config("series.bucket_duration_ms must be positive"));
        }
        Ok(())
    }

    /// Get bucket duration as Duration
    pub fn bucket_duration(&self) -> Duration {
        Duration::from_millis(self.series.bucket_duration_ms.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.series.bucket_duration_ms, DAY_MS);
        assert!(config.series.fill_gaps);
        assert!(!config.series.fixed_grid);
        assert!(config.history.ignore_empty_periods);
        assert_eq!(config.bucket_duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[series]\nbucket_duration_ms = 3600000\n\n[history]\nignore_empty_periods = false").unwrap();

        let config = AnalyticsConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.series.bucket_duration_ms, 3_600_000);
        assert!(config.series.fill_gaps);
        assert!(!config.history.ignore_empty_periods);
        assert!(config.cache.drop_out_of_range);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.toml");

        let mut config = AnalyticsConfig::default();
        config.series.max_bucket_count = 30;
        config.save_to_file(&path).unwrap();

        assert_eq!(AnalyticsConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[series]\nbucket_duration_ms = 0").unwrap();
        assert!(AnalyticsConfig::load_from_file(file.path()).is_err());
    }
}
