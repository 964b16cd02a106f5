//! # JSON File Source
//!
//! Serves environment and statistics snapshots from a JSON fixture on disk,
//! filtering by partition and range the way the remote backend would.

use crate::coverage::TimeRange;
use crate::environment::BattleEnvironment;
use crate::environment_store::EnvironmentSource;
use crate::error::Result;
use crate::partition::{PartitionKey, UserId};
use crate::statistics::BattleStatistics;
use crate::statistics_store::StatisticsSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// On-disk layout of a snapshot fixture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotFixture {
    pub seasons: Vec<BattleEnvironment>,
    pub dailies: Vec<BattleEnvironment>,
    pub master_statistics: Vec<BattleStatistics>,
    pub daily_statistics: Vec<BattleStatistics>,
}

#[derive(Debug, Clone, Default)]
pub struct JsonFileSource {
    fixture: SnapshotFixture,
}

impl JsonFileSource {
    pub fn new(fixture: SnapshotFixture) -> Self {
        Self { fixture }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let fixture: SnapshotFixture = serde_json::from_str(&content)?;
        debug!(
            "Loaded fixture {} ({} seasons, {} dailies)",
            path.as_ref().display(),
            fixture.seasons.len(),
            fixture.dailies.len()
        );
        Ok(Self::new(fixture))
    }

    pub fn fixture(&self) -> &SnapshotFixture {
        &self.fixture
    }
}

#[async_trait]
impl EnvironmentSource for JsonFileSource {
    async fn query_seasons(&self, key: PartitionKey) -> anyhow::Result<Vec<BattleEnvironment>> {
        Ok(self.fixture.seasons.iter().filter(|env| env.partition() == key).cloned().collect())
    }

    async fn query_daily(&self, key: PartitionKey, range: TimeRange) -> anyhow::Result<Vec<BattleEnvironment>> {
        Ok(self
            .fixture
            .dailies
            .iter()
            .filter(|env| env.partition() == key && range.contains(env.start_timestamp))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatisticsSource for JsonFileSource {
    async fn get_master(&self, user: &UserId) -> anyhow::Result<BattleStatistics> {
        self.fixture
            .master_statistics
            .iter()
            .find(|stats| &stats.user_id == user)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no master statistics for {user}"))
    }

    async fn get_daily(&self, user: &UserId, range: TimeRange) -> anyhow::Result<Vec<BattleStatistics>> {
        Ok(self
            .fixture
            .daily_statistics
            .iter()
            .filter(|stats| &stats.user_id == user && range.contains(stats.start_timestamp))
            .cloned()
            .collect())
    }
}
