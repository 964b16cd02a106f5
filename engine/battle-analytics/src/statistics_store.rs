//! Per-user statistics: one master snapshot loaded once per user, and daily
//! snapshots cached incrementally per user.

use crate::config::{AnalyticsConfig, CacheConfig};
use crate::coverage::TimeRange;
use crate::error::{AnalyticsError, Result};
use crate::history::HistoryProjector;
use crate::partition::UserId;
use crate::range_cache::{RangeCache, SnapshotFetcher};
use crate::statistics::BattleStatistics;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Backend that serves per-user statistics
#[async_trait]
pub trait StatisticsSource: Send + Sync {
    async fn get_master(&self, user: &UserId) -> anyhow::Result<BattleStatistics>;

    async fn get_daily(&self, user: &UserId, range: TimeRange) -> anyhow::Result<Vec<BattleStatistics>>;
}

pub struct UserDailyFetcher<S>(Arc<S>);

#[async_trait]
impl<S: StatisticsSource> SnapshotFetcher<UserId, BattleStatistics> for UserDailyFetcher<S> {
    async fn fetch(&self, key: &UserId, range: TimeRange) -> anyhow::Result<Vec<BattleStatistics>> {
        self.0.get_daily(key, range).await
    }
}

pub struct StatisticsStore<S: StatisticsSource> {
    source: Arc<S>,
    projector: HistoryProjector,
    master: DashMap<UserId, BattleStatistics>,
    daily: RangeCache<UserId, BattleStatistics, UserDailyFetcher<S>>,
}

impl<S: StatisticsSource> StatisticsStore<S> {
    pub fn new(source: S) -> Self {
        Self::build(source, HistoryProjector::default(), CacheConfig::default())
    }

    pub fn with_config(source: S, config: &AnalyticsConfig) -> Result<Self> {
        Ok(Self::build(source, HistoryProjector::try_from(config)?, config.cache.clone()))
    }

    fn build(source: S, projector: HistoryProjector, cache: CacheConfig) -> Self {
        let source = Arc::new(source);
        Self {
            daily: RangeCache::with_config(UserDailyFetcher(Arc::clone(&source)), cache),
            source,
            projector,
            master: DashMap::new(),
        }
    }

    pub fn projector(&self) -> &HistoryProjector {
        &self.projector
    }

    /// Load the all-time snapshot of `user` unless already loaded
    pub async fn fetch_master_statistics(&self, user: &UserId) -> Result<BattleStatistics> {
        if let Some(cached) = self.master.get(user) {
            return Ok(cached.value().clone());
        }

        let statistics = self
            .source
            .get_master(user)
            .await
            .map_err(|e| AnalyticsError::load(format!("master statistics of {user}"), e))?;
        info!("Loaded master statistics for {}", user);
        self.master.insert(user.clone(), statistics.clone());
        Ok(statistics)
    }

    pub async fn fetch_daily_statistics(&self, user: &UserId, range: TimeRange) -> Result<Vec<BattleStatistics>> {
        self.daily.ensure_range(user, range).await
    }

    pub fn master_statistics(&self, user: &UserId) -> Option<BattleStatistics> {
        self.master.get(user).map(|stats| stats.value().clone())
    }

    /// Cached dailies of `user` overlapping `range`; never fetches
    pub fn find_daily_statistics(&self, user: &UserId, range: TimeRange) -> Vec<BattleStatistics> {
        self.daily.find(user, range)
    }

    pub fn teardown(&self) {
        self.master.clear();
        self.daily.teardown();
        info!("Statistics store torn down");
    }
}
