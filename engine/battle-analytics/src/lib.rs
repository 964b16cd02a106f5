//! # Battle Analytics
//!
//! Time-bucketed aggregation and incremental range caching for battle
//! environment and player statistics snapshots.
//!
//! - [`candle`] buckets scalar observations into fixed-width, gap-filled windows.
//! - [`history`] projects bucket series into daily and cumulative chart points.
//! - [`aggregate`] adds and subtracts typed count trees, clamping at zero.
//! - [`range_cache`] fetches only the uncovered parts of a requested time range.
//! - [`environment_store`] and [`statistics_store`] tie these together per partition.

pub mod aggregate;
pub mod battle;
pub mod candle;
pub mod cli;
pub mod config;
pub mod coverage;
pub mod environment;
pub mod environment_store;
pub mod error;
pub mod history;
pub mod partition;
pub mod range_cache;
pub mod source;
pub mod statistics;
pub mod statistics_store;

// Re-export main types for easy usage
pub use aggregate::{add, sub, Aggregate, WinLose};
pub use battle::{CategoryFilter, Rule, RuleStageMap, Stage, WeaponId};
pub use candle::{Bucket, CandleSeries, Observation, SeriesOptions, DAY_MS};
pub use config::AnalyticsConfig;
pub use coverage::{IntervalSet, TimeRange};
pub use environment::{BattleEnvironment, WeaponEnvironment};
pub use environment_store::{EnvironmentSource, EnvironmentStore, SeasonSelector};
pub use error::{AnalyticsError, Result};
pub use history::{History, HistoryPoint, HistoryProjector};
pub use partition::{MatchRate, MatchType, PartitionKey, UserId};
pub use range_cache::{RangeCache, SnapshotFetcher, TimeScoped};
pub use source::{JsonFileSource, SnapshotFixture};
pub use statistics::BattleStatistics;
pub use statistics_store::{StatisticsSource, StatisticsStore};
