//! # Battle Statistics
//!
//! Per-user performance snapshots: results per weapon, rule and stage,
//! kill/death breakdowns against each opposing weapon, and special-weapon
//! events. Daily histories are bucketed at the UTC midnight of each
//! snapshot's start.

use crate::aggregate::{Aggregate, WinLose};
use crate::battle::{CategoryFilter, RuleStageMap, WeaponId};
use crate::candle::{CandleSeries, Observation, DAY_MS};
use crate::history::{History, HistoryProjector};
use crate::partition::UserId;
use crate::range_cache::TimeScoped;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kill/death tallies against one opposing weapon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattlePerformance {
    pub kill_main: u64,
    pub kill_sub: u64,
    pub kill_sp: u64,
    pub death_main: u64,
    pub death_sub: u64,
    pub death_sp: u64,
    pub battle_count: u64,
}

impl BattlePerformance {
    pub fn kills(&self) -> u64 {
        self.kill_main + self.kill_sub + self.kill_sp
    }

    pub fn deaths(&self) -> u64 {
        self.death_main + self.death_sub + self.death_sp
    }

    fn fields_mut(&mut self) -> [&mut u64; 7] {
        [
            &mut self.kill_main,
            &mut self.kill_sub,
            &mut self.kill_sp,
            &mut self.death_main,
            &mut self.death_sub,
            &mut self.death_sp,
            &mut self.battle_count,
        ]
    }

    fn fields(&self) -> [u64; 7] {
        [
            self.kill_main,
            self.kill_sub,
            self.kill_sp,
            self.death_main,
            self.death_sub,
            self.death_sp,
            self.battle_count,
        ]
    }
}

impl Aggregate for BattlePerformance {
    fn merge_add(&mut self, other: &Self) {
        for (field, value) in self.fields_mut().into_iter().zip(other.fields()) {
            field.merge_add(&value);
        }
    }

    fn merge_sub(&mut self, other: &Self) {
        for (field, value) in self.fields_mut().into_iter().zip(other.fields()) {
            field.merge_sub(&value);
        }
    }

    fn is_zero(&self) -> bool {
        self.fields().iter().all(|&value| value == 0)
    }
}

/// Special weapon and ink events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleEvent {
    pub sp_trigger: u64,
    pub sp_spoil: u64,
    pub ink_insufficient: u64,
}

impl Aggregate for BattleEvent {
    fn merge_add(&mut self, other: &Self) {
        self.sp_trigger.merge_add(&other.sp_trigger);
        self.sp_spoil.merge_add(&other.sp_spoil);
        self.ink_insufficient.merge_add(&other.ink_insufficient);
    }

    fn merge_sub(&mut self, other: &Self) {
        self.sp_trigger.merge_sub(&other.sp_trigger);
        self.sp_spoil.merge_sub(&other.sp_spoil);
        self.ink_insufficient.merge_sub(&other.ink_insufficient);
    }

    fn is_zero(&self) -> bool {
        self.sp_trigger == 0 && self.sp_spoil == 0 && self.ink_insufficient == 0
    }
}

/// Everything recorded while playing one weapon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponPerformance {
    pub results: RuleStageMap<WinLose>,
    /// Keyed by the opposing weapon
    pub faceoffs: BTreeMap<WeaponId, RuleStageMap<BattlePerformance>>,
    pub events: RuleStageMap<BattleEvent>,
}

impl Aggregate for WeaponPerformance {
    fn merge_add(&mut self, other: &Self) {
        self.results.merge_add(&other.results);
        self.faceoffs.merge_add(&other.faceoffs);
        self.events.merge_add(&other.events);
    }

    fn merge_sub(&mut self, other: &Self) {
        self.results.merge_sub(&other.results);
        self.faceoffs.merge_sub(&other.faceoffs);
        self.events.merge_sub(&other.events);
    }

    fn is_zero(&self) -> bool {
        self.results.is_empty() && self.faceoffs.is_empty() && self.events.is_empty()
    }
}

/// Per-user statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleStatistics {
    pub user_id: UserId,
    #[serde(default)]
    pub statistics_id: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    #[serde(default)]
    pub result_count: u64,
    #[serde(default)]
    pub weapons: BTreeMap<WeaponId, WeaponPerformance>,
}

impl BattleStatistics {
    pub fn new(user_id: UserId, start_timestamp: i64, end_timestamp: i64) -> Self {
        Self {
            user_id,
            statistics_id: String::new(),
            start_timestamp,
            end_timestamp,
            result_count: 0,
            weapons: BTreeMap::new(),
        }
    }

    pub fn weapon_mut(&mut self, weapon: impl Into<WeaponId>) -> &mut WeaponPerformance {
        self.weapons.entry(weapon.into()).or_default()
    }

    pub fn win_lose_count(&self, filter: &CategoryFilter) -> WinLose {
        let mut total = WinLose::default();
        for weapon in self.matching_weapons(filter) {
            for leaf in filter.leaves(&weapon.results) {
                total.merge_add(leaf);
            }
        }
        total
    }

    pub fn win_rate(&self, filter: &CategoryFilter) -> f64 {
        self.win_lose_count(filter).rate()
    }

    /// Wins plus losses
    pub fn battle_count(&self, filter: &CategoryFilter) -> u64 {
        self.win_lose_count(filter).total()
    }

    pub fn kill_count(&self, filter: &CategoryFilter) -> u64 {
        self.faceoff_leaves(filter).map(BattlePerformance::kills).sum()
    }

    pub fn death_count(&self, filter: &CategoryFilter) -> u64 {
        self.faceoff_leaves(filter).map(BattlePerformance::deaths).sum()
    }

    /// Specials triggered
    pub fn special_count(&self, filter: &CategoryFilter) -> u64 {
        self.matching_weapons(filter)
            .flat_map(|weapon| filter.leaves(&weapon.events))
            .map(|event| event.sp_trigger)
            .sum()
    }

    pub fn kill_average(&self, filter: &CategoryFilter) -> f64 {
        per_battle(self.kill_count(filter), self.battle_count(filter))
    }

    pub fn death_average(&self, filter: &CategoryFilter) -> f64 {
        per_battle(self.death_count(filter), self.battle_count(filter))
    }

    pub fn special_average(&self, filter: &CategoryFilter) -> f64 {
        per_battle(self.special_count(filter), self.battle_count(filter))
    }

    fn matching_weapons<'a>(
        &'a self,
        filter: &'a CategoryFilter,
    ) -> impl Iterator<Item = &'a WeaponPerformance> + 'a {
        self.weapons
            .iter()
            .filter(move |(id, _)| filter.matches_weapon(id))
            .map(|(_, weapon)| weapon)
    }

    fn faceoff_leaves<'a>(
        &'a self,
        filter: &'a CategoryFilter,
    ) -> impl Iterator<Item = &'a BattlePerformance> + 'a {
        self.matching_weapons(filter)
            .flat_map(|weapon| weapon.faceoffs.values())
            .flat_map(move |map| filter.leaves(map))
    }
}

fn per_battle(amount: u64, battles: u64) -> f64 {
    if battles == 0 {
        0.0
    } else {
        amount as f64 / battles as f64
    }
}

impl Aggregate for BattleStatistics {
    fn merge_add(&mut self, other: &Self) {
        self.result_count.merge_add(&other.result_count);
        self.weapons.merge_add(&other.weapons);
    }

    fn merge_sub(&mut self, other: &Self) {
        self.result_count.merge_sub(&other.result_count);
        self.weapons.merge_sub(&other.weapons);
    }
}

impl TimeScoped for BattleStatistics {
    fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    fn end_timestamp(&self) -> i64 {
        self.end_timestamp
    }
}

/// UTC midnight of the day containing `timestamp`
pub fn to_zero_hour(timestamp: i64) -> i64 {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|time| time.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp_millis())
        .unwrap_or_else(|| timestamp - timestamp.rem_euclid(DAY_MS))
}

fn daily<F>(projector: &HistoryProjector, statistics: &[BattleStatistics], value: F) -> CandleSeries
where
    F: Fn(&BattleStatistics) -> f64,
{
    projector.series(
        statistics
            .iter()
            .map(|stats| Observation::new(value(stats), to_zero_hour(stats.start_timestamp))),
    )
}

pub fn win_lose_history(
    statistics: &[BattleStatistics],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> (History, History) {
    let win = daily(projector, statistics, |s| s.win_lose_count(filter).win as f64);
    let lose = daily(projector, statistics, |s| s.win_lose_count(filter).lose as f64);
    projector.win_lose_history(&win, &lose)
}

pub fn win_rate_history(
    statistics: &[BattleStatistics],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    let win = daily(projector, statistics, |s| s.win_lose_count(filter).win as f64);
    let lose = daily(projector, statistics, |s| s.win_lose_count(filter).lose as f64);
    projector.win_rate_history(&win, &lose)
}

pub fn battle_count_history(
    statistics: &[BattleStatistics],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    projector.count_history(&daily(projector, statistics, |s| s.battle_count(filter) as f64))
}

/// Kills per battle, daily and cumulative
pub fn kill_average_history(
    statistics: &[BattleStatistics],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    let kills = daily(projector, statistics, |s| s.kill_count(filter) as f64);
    let battles = daily(projector, statistics, |s| s.battle_count(filter) as f64);
    projector.average_history(&kills, &battles)
}

pub fn death_average_history(
    statistics: &[BattleStatistics],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    let deaths = daily(projector, statistics, |s| s.death_count(filter) as f64);
    let battles = daily(projector, statistics, |s| s.battle_count(filter) as f64);
    projector.average_history(&deaths, &battles)
}

pub fn special_average_history(
    statistics: &[BattleStatistics],
    filter: &CategoryFilter,
    projector: &HistoryProjector,
) -> History {
    let specials = daily(projector, statistics, |s| s.special_count(filter) as f64);
    let battles = daily(projector, statistics, |s| s.battle_count(filter) as f64);
    projector.average_history(&specials, &battles)
}

/// Sum of a run of snapshots, `None` when empty
pub fn total(statistics: &[BattleStatistics]) -> Option<BattleStatistics> {
    crate::aggregate::sum_all(statistics)
}
