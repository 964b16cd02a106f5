//! # Battle Environment
//!
//! Snapshot of the battle population for one partition over one time
//! window: how many battles were played per rule and stage, and for every
//! weapon how often it appeared and how it fared.

use crate::aggregate::{Aggregate, WinLose};
use crate::battle::{count_leaves, CategoryFilter, Rule, RuleStageMap, Stage, WeaponId};
use crate::candle::Observation;
use crate::history::{History, HistoryProjector};
use crate::partition::{MatchRate, MatchType, PartitionKey};
use crate::range_cache::TimeScoped;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-weapon slice of an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponEnvironment {
    pub result: RuleStageMap<WinLose>,
    pub usage: RuleStageMap<u64>,
    pub battles: RuleStageMap<u64>,
}

impl WeaponEnvironment {
    /// Record `usage` appearances of the weapon in battles ending with `result`
    pub fn record(&mut self, rule: Rule, stage: Stage, usage: u64, result: WinLose) {
        self.usage.entry(rule).or_default().entry(stage).or_default().merge_add(&usage);
        self.battles.entry(rule).or_default().entry(stage).or_default().merge_add(&result.total());
        self.result.entry(rule).or_default().entry(stage).or_default().merge_add(&result);
    }
}

impl Aggregate for WeaponEnvironment {
    fn merge_add(&mut self, other: &Self) {
        self.result.merge_add(&other.result);
        self.usage.merge_add(&other.usage);
        self.battles.merge_add(&other.battles);
    }

    fn merge_sub(&mut self, other: &Self) {
        self.result.merge_sub(&other.result);
        self.usage.merge_sub(&other.usage);
        self.battles.merge_sub(&other.battles);
    }

    fn is_zero(&self) -> bool {
        self.result.is_empty() && self.usage.is_empty() && self.battles.is_empty()
    }
}

/// Environment snapshot for one partition and window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleEnvironment {
    #[serde(default)]
    pub environment_tag: String,
    #[serde(default)]
    pub season_name: String,
    pub match_type: MatchType,
    pub match_rate: MatchRate,
    #[serde(default)]
    pub result_count: u64,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    #[serde(default)]
    pub battles: RuleStageMap<u64>,
    #[serde(default)]
    pub weapons: BTreeMap<WeaponId, WeaponEnvironment>,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub latest_battle_date: i64,
}

impl BattleEnvironment {
    /// Empty snapshot for `key` covering `[start_timestamp, end_timestamp)`
    pub fn new(key: PartitionKey, start_timestamp: i64, end_timestamp: i64) -> Self {
        Self {
            environment_tag: String::new(),
            season_name: String::new(),
            match_type: key.match_type,
            match_rate: key.match_rate,
            result_count: 0,
            start_timestamp,
            end_timestamp,
            battles: RuleStageMap::new(),
            weapons: BTreeMap::new(),
            updated_at: 0,
            latest_battle_date: end_timestamp,
        }
    }

    pub fn with_season(mut self, season_name: impl Into<String>) -> Self {
        self.season_name = season_name.into();
        self
    }

    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.match_type, self.match_rate)
    }

    /// Record `count` battles on a rule and stage
    pub fn record_battles(&mut self, rule: Rule, stage: Stage, count: u64) {
        self.battles.entry(rule).or_default().entry(stage).or_default().merge_add(&count);
        self.result_count += count;
    }

    /// Mutable per-weapon slice, created on first access
    pub fn weapon_mut(&mut self, weapon: impl Into<WeaponId>) -> &mut WeaponEnvironment {
        self.weapons.entry(weapon.into()).or_default()
    }

    /// Battles on the matching rules and stages; the weapon restriction is ignored
    pub fn battle_count(&self, filter: &CategoryFilter) -> u64 {
        count_leaves(&self.battles, filter)
    }

    /// Appearances of the matching weapons on the matching rules and stages
    pub fn usage_count(&self, filter: &CategoryFilter) -> u64 {
        self.matching_weapons(filter).map(|weapon| count_leaves(&weapon.usage, filter)).sum()
    }

    pub fn win_lose_count(&self, filter: &CategoryFilter) -> WinLose {
        let mut total = WinLose::default();
        for weapon in self.matching_weapons(filter) {
            for leaf in filter.leaves(&weapon.result) {
                total.merge_add(leaf);
            }
        }
        total
    }

    /// Share of battles in which the matching weapons appeared, 0 without battles
    pub fn usage_rate(&self, filter: &CategoryFilter) -> f64 {
        let battles = self.battle_count(filter);
        if battles == 0 {
            return 0.0;
        }
        self.usage_count(filter) as f64 / battles as f64
    }

    pub fn weapon_ids(&self) -> impl Iterator<Item = &WeaponId> {
        self.weapons.keys()
    }

    pub fn rules(&self) -> BTreeSet<Rule> {
        self.battles.keys().copied().collect()
    }

    pub fn stages(&self) -> BTreeSet<Stage> {
        self.battles.values().flat_map(|stages| stages.keys().copied()).collect()
    }

    fn matching_weapons<'a>(
        &'a self,
        filter: &'a CategoryFilter,
    ) -> impl Iterator<Item = &'a WeaponEnvironment> + 'a {
        self.weapons
            .iter()
            .filter(move |(id, _)| filter.matches_weapon(id))
            .map(|(_, weapon)| weapon)
    }
}

/// Metadata is kept from `self`; only counts are merged
impl Aggregate for BattleEnvironment {
    fn merge_add(&mut self, other: &Self) {
        self.result_count.merge_add(&other.result_count);
        self.battles.merge_add(&other.battles);
        self.weapons.merge_add(&other.weapons);
    }

    fn merge_sub(&mut self, other: &Self) {
        self.result_count.merge_sub(&other.result_count);
        self.battles.merge_sub(&other.battles);
        self.weapons.merge_sub(&other.weapons);
    }
}

impl TimeScoped for BattleEnvironment {
    fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    fn end_timestamp(&self) -> i64 {
        self.end_timestamp
    }
}

/// Battle counts of a run of snapshots, bucketed by their start timestamp
pub fn battle_count_history(
    environments: &[BattleEnvironment],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    let counts = projector.series(
        environments
            .iter()
            .map(|env| Observation::new(env.battle_count(filter) as f64, env.start_timestamp)),
    );
    projector.count_history(&counts)
}

/// Weapon usage of a run of snapshots, bucketed by their start timestamp
pub fn usage_count_history(
    environments: &[BattleEnvironment],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    let counts = projector.series(
        environments
            .iter()
            .map(|env| Observation::new(env.usage_count(filter) as f64, env.start_timestamp)),
    );
    projector.count_history(&counts)
}
