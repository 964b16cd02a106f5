//! # Environment Store
//!
//! Season and daily environment snapshots per partition. Seasons are loaded
//! once per partition; dailies go through a [`RangeCache`] so only uncovered
//! days are ever requested. Rate-union partitions (`x_match|all`) are never
//! fetched directly: each rate band is loaded on its own and the union is
//! folded together with [`Aggregate::merge_add`].

use crate::aggregate::{sub, Aggregate};
use crate::battle::{CategoryFilter, Rule, RuleStageMap, Stage, WeaponId};
use crate::candle::DAY_MS;
use crate::config::{AnalyticsConfig, CacheConfig};
use crate::coverage::TimeRange;
use crate::environment::{self, BattleEnvironment};
use crate::error::{AnalyticsError, Result};
use crate::history::{History, HistoryProjector};
use crate::partition::{MatchRate, PartitionKey};
use crate::range_cache::{RangeCache, SnapshotFetcher};
use crate::statistics::to_zero_hour;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Backend that serves environment snapshots
#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    /// Every season snapshot of one (non-union) partition
    async fn query_seasons(&self, key: PartitionKey) -> anyhow::Result<Vec<BattleEnvironment>>;

    /// Daily snapshots of one (non-union) partition starting inside `range`
    async fn query_daily(&self, key: PartitionKey, range: TimeRange) -> anyhow::Result<Vec<BattleEnvironment>>;
}

/// Adapts an [`EnvironmentSource`] to the range cache
pub struct DailyFetcher<S>(Arc<S>);

#[async_trait]
impl<S: EnvironmentSource> SnapshotFetcher<PartitionKey, BattleEnvironment> for DailyFetcher<S> {
    async fn fetch(&self, key: &PartitionKey, range: TimeRange) -> anyhow::Result<Vec<BattleEnvironment>> {
        self.0.query_daily(*key, range).await
    }
}

/// Which season snapshots to select
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeasonSelector {
    #[default]
    All,
    Latest,
    Named(String),
}

impl fmt::Display for SeasonSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeasonSelector::All => f.write_str("all"),
            SeasonSelector::Latest => f.write_str("latest"),
            SeasonSelector::Named(name) => f.write_str(name),
        }
    }
}

impl FromStr for SeasonSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "all" => SeasonSelector::All,
            "latest" => SeasonSelector::Latest,
            name => SeasonSelector::Named(name.to_string()),
        })
    }
}

/// Daily rate union together with the constituent generations it was built from
#[derive(Default)]
struct DailyUnion {
    generations: Vec<u64>,
    dailies: Vec<BattleEnvironment>,
}

/// Environment snapshots for every partition
pub struct EnvironmentStore<S: EnvironmentSource> {
    source: Arc<S>,
    projector: HistoryProjector,
    /// Presence of a key marks its seasons as loaded
    seasons: DashMap<PartitionKey, Vec<BattleEnvironment>>,
    season_unions: DashMap<PartitionKey, Vec<BattleEnvironment>>,
    daily: RangeCache<PartitionKey, BattleEnvironment, DailyFetcher<S>>,
    daily_unions: DashMap<PartitionKey, DailyUnion>,
    selected: RwLock<PartitionKey>,
}

impl<S: EnvironmentSource> EnvironmentStore<S> {
    pub fn new(source: S) -> Self {
        Self::build(source, HistoryProjector::default(), CacheConfig::default())
    }

    /// Fails when `[series]` describes an unusable bucket grid
    pub fn with_config(source: S, config: &AnalyticsConfig) -> Result<Self> {
        Ok(Self::build(source, HistoryProjector::try_from(config)?, config.cache.clone()))
    }

    fn build(source: S, projector: HistoryProjector, cache: CacheConfig) -> Self {
        let source = Arc::new(source);
        Self {
            daily: RangeCache::with_config(DailyFetcher(Arc::clone(&source)), cache),
            source,
            projector,
            seasons: DashMap::new(),
            season_unions: DashMap::new(),
            daily_unions: DashMap::new(),
            selected: RwLock::new(PartitionKey::global()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn select_partition(&self, key: PartitionKey) {
        *self.selected.write() = key;
        debug!("Selected partition {}", key);
    }

    pub fn selected_partition(&self) -> PartitionKey {
        *self.selected.read()
    }

    /// Load the season snapshots of `key` unless already loaded.
    ///
    /// For a rate union only the bands not yet loaded are requested. The
    /// per-season union is rebuilt on the next read after any band loads.
    pub async fn fetch_season_environments(&self, key: PartitionKey) -> Result<Vec<BattleEnvironment>> {
        if !key.is_rate_union() {
            self.load_seasons(key).await?;
            return Ok(self.get_season_environments(&SeasonSelector::All, key, true));
        }

        let pending: Vec<PartitionKey> =
            key.constituents().into_iter().filter(|k| !self.seasons.contains_key(k)).collect();
        let results = join_all(pending.into_iter().map(|k| self.load_seasons(k))).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;

        Ok(self.get_season_environments(&SeasonSelector::All, key, true))
    }

    async fn load_seasons(&self, key: PartitionKey) -> Result<()> {
        if self.seasons.contains_key(&key) {
            return Ok(());
        }

        let mut seasons = self
            .source
            .query_seasons(key)
            .await
            .map_err(|e| AnalyticsError::load(format!("seasons of {key}"), e))?;
        seasons.sort_by_key(|env| env.start_timestamp);

        info!("Loaded {} seasons for {}", seasons.len(), key);
        self.seasons.insert(key, seasons);
        // A band loaded on its own makes its union stale.
        if let Some(union) = key.rate_union() {
            self.season_unions.remove(&union);
        }
        Ok(())
    }

    fn season_union(&self, key: PartitionKey) -> Vec<BattleEnvironment> {
        if let Some(union) = self.season_unions.get(&key) {
            return union.value().clone();
        }
        self.rebuild_season_union(key)
    }

    fn rebuild_season_union(&self, key: PartitionKey) -> Vec<BattleEnvironment> {
        let mut by_season: BTreeMap<String, BattleEnvironment> = BTreeMap::new();
        for season in self.concat_seasons(key) {
            match by_season.get_mut(&season.season_name) {
                Some(total) => total.merge_add(&season),
                None => {
                    by_season.insert(season.season_name.clone(), union_metadata(season, key));
                }
            }
        }

        let mut union: Vec<BattleEnvironment> = by_season.into_values().collect();
        union.sort_by_key(|env| env.start_timestamp);
        info!("Rebuilt {} season union ({} seasons)", key, union.len());
        self.season_unions.insert(key, union.clone());
        union
    }

    /// Ensure `range` is cached for `key` and return the overlapping dailies.
    ///
    /// For a rate union every band is ensured concurrently. Bands that did
    /// merge still show up in the union when another band fails.
    pub async fn fetch_daily_environments(
        &self,
        key: PartitionKey,
        range: TimeRange,
    ) -> Result<Vec<BattleEnvironment>> {
        if !key.is_rate_union() {
            return self.daily.ensure_range(&key, range).await;
        }

        let constituents = key.constituents();
        let results = join_all(constituents.iter().map(|k| self.daily.ensure_range(k, range))).await;
        for result in results {
            result?;
        }

        Ok(self.find_daily_environments(range, key, true))
    }

    fn refresh_daily_union(&self, key: PartitionKey) {
        let constituents = key.constituents();
        let generations: Vec<u64> = constituents.iter().map(|k| self.daily.generation(k)).collect();

        if self.daily_unions.get(&key).is_some_and(|union| union.generations == generations) {
            return;
        }

        let mut by_start: BTreeMap<i64, BattleEnvironment> = BTreeMap::new();
        for daily in constituents.iter().flat_map(|k| self.daily.snapshots(k)) {
            match by_start.get_mut(&daily.start_timestamp) {
                Some(total) => total.merge_add(&daily),
                None => {
                    by_start.insert(daily.start_timestamp, union_metadata(daily, key));
                }
            }
        }

        let dailies: Vec<BattleEnvironment> = by_start.into_values().collect();
        info!("Rebuilt {} daily union ({} days)", key, dailies.len());
        self.daily_unions.insert(key, DailyUnion { generations, dailies });
    }

    /// Loaded season snapshots; never fetches
    pub fn get_season_environments(
        &self,
        season: &SeasonSelector,
        key: PartitionKey,
        sum_all_rates: bool,
    ) -> Vec<BattleEnvironment> {
        let seasons = if key.is_rate_union() && sum_all_rates {
            self.season_union(key)
        } else if key.is_rate_union() {
            self.concat_seasons(key)
        } else {
            self.seasons.get(&key).map(|seasons| seasons.value().clone()).unwrap_or_default()
        };

        match season {
            SeasonSelector::All => seasons,
            SeasonSelector::Latest => seasons.into_iter().last().into_iter().collect(),
            SeasonSelector::Named(name) => seasons.into_iter().filter(|s| &s.season_name == name).collect(),
        }
    }

    fn concat_seasons(&self, key: PartitionKey) -> Vec<BattleEnvironment> {
        key.constituents()
            .iter()
            .filter_map(|k| self.seasons.get(k).map(|seasons| seasons.value().clone()))
            .flatten()
            .collect()
    }

    /// Cached daily snapshots overlapping `range`; never fetches
    pub fn find_daily_environments(
        &self,
        range: TimeRange,
        key: PartitionKey,
        sum_all_rates: bool,
    ) -> Vec<BattleEnvironment> {
        if !key.is_rate_union() {
            return self.daily.find(&key, range);
        }
        if !sum_all_rates {
            return key.constituents().iter().flat_map(|k| self.daily.find(k, range)).collect();
        }

        // Bands may have been fetched on their own since the last rebuild.
        self.refresh_daily_union(key);

        self.daily_unions
            .get(&key)
            .map(|union| {
                union
                    .dailies
                    .iter()
                    .filter(|env| env.start_timestamp < range.end && range.start < env.end_timestamp)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Battle counts per rule and stage over the selected seasons
    pub fn all_battles(&self, season: &SeasonSelector, key: PartitionKey) -> RuleStageMap<u64> {
        let mut battles = RuleStageMap::new();
        for env in self.get_season_environments(season, key, true) {
            battles.merge_add(&env.battles);
        }
        battles
    }

    pub fn all_weapons(&self, season: &SeasonSelector, key: PartitionKey) -> BTreeSet<WeaponId> {
        self.get_season_environments(season, key, true)
            .into_iter()
            .flat_map(|env| env.weapons.into_keys())
            .collect()
    }

    pub fn all_rules(&self, season: &SeasonSelector, key: PartitionKey) -> BTreeSet<Rule> {
        self.all_battles(season, key).into_keys().collect()
    }

    pub fn all_stages(&self, season: &SeasonSelector, key: PartitionKey) -> BTreeSet<Stage> {
        self.all_battles(season, key).into_values().flat_map(|stages| stages.into_keys()).collect()
    }

    pub fn battle_count_history(&self, range: TimeRange, key: PartitionKey, filter: &CategoryFilter) -> History {
        let dailies = self.find_daily_environments(range, key, true);
        environment::battle_count_history(&dailies, filter, &self.projector)
    }

    pub fn usage_count_history(&self, range: TimeRange, key: PartitionKey, filter: &CategoryFilter) -> History {
        let dailies = self.find_daily_environments(range, key, true);
        environment::usage_count_history(&dailies, filter, &self.projector)
    }

    /// Latest season total minus its last `days` dailies.
    ///
    /// The window spans the `days` UTC days up to and including the day of
    /// `reference`, or of the season's latest battle date when none is given.
    /// The store holds no clock: callers wanting a window relative to now pass
    /// `Some(now)`. Dailies must already be cached.
    pub fn season_environment_days_before(
        &self,
        days: u32,
        reference: Option<i64>,
        key: PartitionKey,
    ) -> Option<BattleEnvironment> {
        let latest = self.get_season_environments(&SeasonSelector::Latest, key, true).pop()?;
        if days == 0 {
            return Some(latest);
        }

        let end = to_zero_hour(reference.unwrap_or(latest.latest_battle_date)) + DAY_MS;
        let start = end - i64::from(days) * DAY_MS;
        let dailies = self.find_daily_environments(TimeRange::new(start, end), key, true);
        debug!("Subtracting {} dailies from season {}", dailies.len(), latest.season_name);
        Some(dailies.iter().fold(latest, |total, daily| sub(&total, daily)))
    }

    /// Forget every loaded season, daily and union, and reset the selection
    pub fn teardown(&self) {
        self.daily.teardown();
        self.seasons.clear();
        self.season_unions.clear();
        self.daily_unions.clear();
        *self.selected.write() = PartitionKey::global();
        info!("Environment store torn down");
    }
}

/// First constituent of a union, relabelled as the union partition
fn union_metadata(mut env: BattleEnvironment, key: PartitionKey) -> BattleEnvironment {
    env.match_type = key.match_type;
    env.match_rate = MatchRate::All;
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::WinLose;
    use crate::partition::MatchType;
    use parking_lot::Mutex;

    /// Two battles per band per day, one season per band
    #[derive(Default)]
    struct FakeSource {
        season_calls: Mutex<Vec<PartitionKey>>,
        daily_calls: Mutex<Vec<(PartitionKey, TimeRange)>>,
        fail_band: Option<MatchRate>,
    }

    fn daily(key: PartitionKey, day: i64, battles: u64) -> BattleEnvironment {
        let mut env = BattleEnvironment::new(key, day * DAY_MS, (day + 1) * DAY_MS);
        env.record_battles(Rule::Area, Stage::Amabi, battles);
        env.weapon_mut("wakaba").record(Rule::Area, Stage::Amabi, battles, WinLose::new(battles, 0));
        env
    }

    #[async_trait]
    impl EnvironmentSource for FakeSource {
        async fn query_seasons(&self, key: PartitionKey) -> anyhow::Result<Vec<BattleEnvironment>> {
            self.season_calls.lock().push(key);
            if self.fail_band == Some(key.match_rate) {
                anyhow::bail!("seasons unavailable");
            }
            let mut spring = daily(key, 0, 100).with_season("spring");
            spring.end_timestamp = 30 * DAY_MS;
            spring.latest_battle_date = 10 * DAY_MS;
            let mut summer = daily(key, 90, 10).with_season("summer");
            summer.record_battles(Rule::Hoko, Stage::Zatou, 1);
            Ok(vec![summer, spring])
        }

        async fn query_daily(&self, key: PartitionKey, range: TimeRange) -> anyhow::Result<Vec<BattleEnvironment>> {
            self.daily_calls.lock().push((key, range));
            if self.fail_band == Some(key.match_rate) {
                anyhow::bail!("dailies unavailable");
            }
            Ok((range.start / DAY_MS..range.end / DAY_MS).map(|day| daily(key, day, 2)).collect())
        }
    }

    fn days(from: i64, to: i64) -> TimeRange {
        TimeRange::new(from * DAY_MS, to * DAY_MS)
    }

    fn x_all() -> PartitionKey {
        PartitionKey::x_match(MatchRate::All)
    }

    #[tokio::test]
    async fn test_seasons_are_loaded_once_and_sorted() {
        let store = EnvironmentStore::new(FakeSource::default());
        let key = PartitionKey::match_type(MatchType::BankaraMatch);

        let seasons = store.fetch_season_environments(key).await.unwrap();
        assert_eq!(seasons.iter().map(|s| s.season_name.as_str()).collect::<Vec<_>>(), vec!["spring", "summer"]);
        store.fetch_season_environments(key).await.unwrap();
        assert_eq!(store.source().season_calls.lock().len(), 1);

        let latest = store.get_season_environments(&SeasonSelector::Latest, key, true);
        assert_eq!(latest[0].season_name, "summer");
        let named = store.get_season_environments(&"spring".parse().unwrap(), key, true);
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn test_season_union_sums_every_band_per_season() {
        let store = EnvironmentStore::new(FakeSource::default());
        store.fetch_season_environments(PartitionKey::x_match(MatchRate::Upper4000)).await.unwrap();

        let union = store.fetch_season_environments(x_all()).await.unwrap();
        // The band loaded earlier is not requested again.
        assert_eq!(store.source().season_calls.lock().len(), MatchRate::BANDS.len());

        assert_eq!(union.len(), 2);
        assert_eq!(union[0].season_name, "spring");
        assert_eq!(union[0].result_count, 100 * MatchRate::BANDS.len() as u64);
        assert_eq!(union[0].partition(), x_all());

        let separate = store.get_season_environments(&SeasonSelector::All, x_all(), false);
        assert_eq!(separate.len(), 2 * MatchRate::BANDS.len());
    }

    #[tokio::test]
    async fn test_catalogue_reads() {
        let store = EnvironmentStore::new(FakeSource::default());
        let key = PartitionKey::global();
        store.fetch_season_environments(key).await.unwrap();

        assert_eq!(store.all_rules(&SeasonSelector::All, key), [Rule::Area, Rule::Hoko].into_iter().collect());
        assert_eq!(store.all_stages(&SeasonSelector::Latest, key).len(), 2);
        assert_eq!(store.all_rules(&"spring".parse().unwrap(), key).len(), 1);
        assert_eq!(store.all_weapons(&SeasonSelector::All, key).len(), 1);
        assert_eq!(store.all_battles(&SeasonSelector::All, key)[&Rule::Area][&Stage::Amabi], 110);
    }

    #[tokio::test]
    async fn test_daily_union_extends_incrementally() {
        let store = EnvironmentStore::new(FakeSource::default());

        let first = store.fetch_daily_environments(x_all(), days(1, 10)).await.unwrap();
        assert_eq!(first.len(), 9);
        assert_eq!(first[0].result_count, 2 * MatchRate::BANDS.len() as u64);

        let second = store.fetch_daily_environments(x_all(), days(1, 15)).await.unwrap();
        assert_eq!(second.len(), 14);

        let calls = store.source().daily_calls.lock().clone();
        assert_eq!(calls.len(), 2 * MatchRate::BANDS.len());
        assert!(calls[MatchRate::BANDS.len()..].iter().all(|(_, range)| *range == days(10, 15)));

        let per_band = store.find_daily_environments(days(1, 15), x_all(), false);
        assert_eq!(per_band.len(), 14 * MatchRate::BANDS.len());
    }

    #[tokio::test]
    async fn test_union_follows_bands_fetched_directly() {
        let store = EnvironmentStore::new(FakeSource::default());
        let band = PartitionKey::x_match(MatchRate::Upper4000);
        store.fetch_daily_environments(x_all(), days(0, 3)).await.unwrap();
        store.fetch_daily_environments(band, days(3, 6)).await.unwrap();

        let union = store.find_daily_environments(days(0, 6), x_all(), true);
        assert_eq!(union.len(), 6);
        assert_eq!(union[0].result_count, 2 * MatchRate::BANDS.len() as u64);
        assert_eq!(union[5].result_count, 2);
        assert_eq!(union[5].partition(), x_all());

        let history = store.battle_count_history(days(0, 6), x_all(), &CategoryFilter::any());
        let expected = 3 * 2 * MatchRate::BANDS.len() as u64 + 3 * 2;
        assert_eq!(history.total.last().map(|p| p.y), Some(expected as f64));

        // Season unions pick up a band loaded on its own as well.
        assert!(store.get_season_environments(&SeasonSelector::All, x_all(), true).is_empty());
        store.fetch_season_environments(band).await.unwrap();
        let seasons = store.get_season_environments(&SeasonSelector::All, x_all(), true);
        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[0].result_count, 100);
    }

    #[tokio::test]
    async fn test_failed_band_fails_the_union_fetch() {
        let source = FakeSource { fail_band: Some(MatchRate::From2000To2500), ..Default::default() };
        let store = EnvironmentStore::new(source);

        let err = store.fetch_daily_environments(x_all(), days(0, 3)).await.unwrap_err();
        assert!(err.is_fetch());

        // Other bands were merged and still show up in the union.
        let union = store.find_daily_environments(days(0, 3), x_all(), true);
        assert_eq!(union.len(), 3);
        assert_eq!(union[0].result_count, 2 * (MatchRate::BANDS.len() as u64 - 1));
    }

    #[tokio::test]
    async fn test_season_minus_recent_days() {
        let store = EnvironmentStore::new(FakeSource::default());
        let key = PartitionKey::match_type(MatchType::RegularMatch);
        store.fetch_season_environments(key).await.unwrap();
        store.fetch_daily_environments(key, days(80, 100)).await.unwrap();

        // Latest season is "summer" with 11 battles; days 91..=93 hold 2 each.
        let delta = store.season_environment_days_before(3, Some(93 * DAY_MS + 5), key).unwrap();
        assert_eq!(delta.season_name, "summer");
        assert_eq!(delta.battle_count(&CategoryFilter::any().with_rule(Rule::Area)), 4);
        assert_eq!(delta.result_count, 5);

        let untouched = store.season_environment_days_before(0, None, key).unwrap();
        assert_eq!(untouched.result_count, 11);
    }

    #[tokio::test]
    async fn test_days_before_defaults_to_latest_battle_date() {
        let store = EnvironmentStore::new(FakeSource::default());
        let key = PartitionKey::match_type(MatchType::RegularMatch);
        store.fetch_season_environments(key).await.unwrap();
        store.fetch_daily_environments(key, days(80, 100)).await.unwrap();

        // Summer's latest battle is on day 91, so the window is days 89..=91.
        let defaulted = store.season_environment_days_before(3, None, key).unwrap();
        let explicit = store.season_environment_days_before(3, Some(91 * DAY_MS), key).unwrap();
        assert_eq!(defaulted, explicit);
        assert_eq!(defaulted.result_count, 5);

        // A reference long after the season has no cached dailies to subtract.
        let later = store.season_environment_days_before(3, Some(200 * DAY_MS), key).unwrap();
        assert_eq!(later.result_count, 11);
    }

    #[tokio::test]
    async fn test_histories_and_teardown() {
        let store = EnvironmentStore::new(FakeSource::default());
        let key = PartitionKey::global();
        store.select_partition(x_all());
        assert_eq!(store.selected_partition(), x_all());

        store.fetch_daily_environments(key, days(0, 4)).await.unwrap();
        let history = store.battle_count_history(days(0, 4), key, &CategoryFilter::any());
        assert_eq!(history.total.last().map(|p| p.y), Some(8.0));
        let usage = store.usage_count_history(days(0, 4), key, &CategoryFilter::any().with_weapon("sshooter"));
        assert_eq!(usage.total.last().map(|p| p.y), Some(0.0));

        store.teardown();
        assert!(store.find_daily_environments(days(0, 4), key, true).is_empty());
        assert_eq!(store.selected_partition(), PartitionKey::global());
        assert!(store.season_environment_days_before(1, None, key).is_none());
    }
}
