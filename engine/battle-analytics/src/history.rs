//! # History Projection
//!
//! Walks candle series and produces parallel "daily" and "total" point
//! series for charts. Totals are running sums over every retained bucket,
//! so skipping an empty bucket never changes the next emitted total.

use crate::aggregate::win_rate;
use crate::candle::{Bucket, CandleSeries, Observation, SeriesOptions};
use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// One chart point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub x: i64,
    pub y: f64,
    pub start_ts: i64,
    pub end_ts: i64,
}

impl HistoryPoint {
    fn at(bucket: &Bucket, y: f64) -> Self {
        Self { x: bucket.start_time, y, start_ts: bucket.start_time, end_ts: bucket.end_time }
    }
}

/// Per-bucket and cumulative series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub total: Vec<HistoryPoint>,
    pub daily: Vec<HistoryPoint>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.daily.is_empty()
    }

    pub fn len(&self) -> usize {
        self.daily.len()
    }

    fn push(&mut self, bucket: &Bucket, daily: f64, total: f64) {
        self.daily.push(HistoryPoint::at(bucket, daily));
        self.total.push(HistoryPoint::at(bucket, total));
    }
}

/// Percentage with one decimal, e.g. `0.5678 -> 56.8`
pub fn round_rate(ratio: f64) -> f64 {
    (ratio * 1000.0).round() / 10.0
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Buckets samples into candle series and projects them into chart histories
#[derive(Debug, Clone)]
pub struct HistoryProjector {
    pub ignore_empty_periods: bool,
    /// Empty series every projection is bucketed into
    template: CandleSeries,
}

impl Default for HistoryProjector {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Series options from `[series]`, empty-period handling from `[history]`
impl TryFrom<&AnalyticsConfig> for HistoryProjector {
    type Error = AnalyticsError;

    fn try_from(config: &AnalyticsConfig) -> Result<Self> {
        Self::new(config.history.ignore_empty_periods).with_series(SeriesOptions::from(&config.series))
    }
}

impl HistoryProjector {
    /// Projector over daily series
    pub fn new(ignore_empty_periods: bool) -> Self {
        Self { ignore_empty_periods, template: CandleSeries::daily() }
    }

    /// Bucket with `options` instead; fails on a non-positive bucket duration
    pub fn with_series(mut self, options: SeriesOptions) -> Result<Self> {
        self.template = CandleSeries::new(options)?;
        Ok(self)
    }

    pub fn series_options(&self) -> &SeriesOptions {
        self.template.options()
    }

    /// Bucket `(timestamp, value)` samples with this projector's series options
    pub fn series(&self, samples: impl IntoIterator<Item = Observation>) -> CandleSeries {
        let mut series = self.template.clone();
        for sample in samples {
            series.add_value(sample);
        }
        series
    }

    /// Daily sums and their running total
    pub fn count_history(&self, series: &CandleSeries) -> History {
        let mut history = History::default();
        let mut total = 0.0;

        for bucket in series.buckets() {
            total += bucket.sum();
            if self.ignore_empty_periods && bucket.is_empty() {
                continue;
            }
            history.push(bucket, bucket.sum(), total);
        }
        history
    }

    /// Win and lose count histories from two parallel series.
    ///
    /// A bucket is skipped only when both sides are empty.
    pub fn win_lose_history(&self, win: &CandleSeries, lose: &CandleSeries) -> (History, History) {
        let mut win_history = History::default();
        let mut lose_history = History::default();
        let (mut win_total, mut lose_total) = (0.0, 0.0);

        for (index, win_bucket) in win.buckets().enumerate() {
            let lose_bucket = lose.get_bucket(index);
            let daily_lose = lose_bucket.map_or(0.0, Bucket::sum);
            win_total += win_bucket.sum();
            lose_total += daily_lose;

            if self.ignore_empty_periods && win_bucket.is_empty() && lose_bucket.is_none_or(Bucket::is_empty) {
                continue;
            }
            win_history.push(win_bucket, win_bucket.sum(), win_total);
            lose_history.push(win_bucket, daily_lose, lose_total);
        }
        (win_history, lose_history)
    }

    /// Win rate in percent per bucket and over the running totals
    pub fn win_rate_history(&self, win: &CandleSeries, lose: &CandleSeries) -> History {
        let mut history = History::default();
        let (mut win_total, mut lose_total) = (0.0, 0.0);

        for (index, win_bucket) in win.buckets().enumerate() {
            let lose_bucket = lose.get_bucket(index);
            let daily_win = win_bucket.sum();
            let daily_lose = lose_bucket.map_or(0.0, Bucket::sum);
            win_total += daily_win;
            lose_total += daily_lose;

            if self.ignore_empty_periods && win_bucket.is_empty() && lose_bucket.is_none_or(Bucket::is_empty) {
                continue;
            }
            history.push(
                win_bucket,
                round_rate(win_rate(daily_win, daily_lose)),
                round_rate(win_rate(win_total, lose_total)),
            );
        }
        history
    }

    /// Per-battle average of `amount` (kills, deaths, specials) over `count`.
    ///
    /// Buckets with an empty count side are skipped; a zero denominator yields 0.
    pub fn average_history(&self, amount: &CandleSeries, count: &CandleSeries) -> History {
        let mut history = History::default();
        let (mut amount_total, mut count_total) = (0.0, 0.0);

        for (index, count_bucket) in count.buckets().enumerate() {
            let daily_amount = amount.get_bucket(index).map_or(0.0, Bucket::sum);
            let daily_count = count_bucket.sum();
            amount_total += daily_amount;
            count_total += daily_count;

            if self.ignore_empty_periods && count_bucket.is_empty() {
                continue;
            }
            history.push(
                count_bucket,
                ratio(daily_amount, daily_count),
                ratio(amount_total, count_total),
            );
        }
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::DAY_MS;

    fn day(n: i64) -> i64 {
        n * DAY_MS
    }

    fn series(points: &[(f64, i64)]) -> CandleSeries {
        HistoryProjector::default().series(points.iter().map(|&(value, ts)| Observation::new(value, ts)))
    }

    fn ys(points: &[HistoryPoint]) -> Vec<f64> {
        points.iter().map(|p| p.y).collect()
    }

    #[test]
    fn test_count_history_skips_empty_days() {
        let counts = series(&[(3.0, day(0)), (5.0, day(2)), (2.0, day(3))]);

        let history = HistoryProjector::new(true).count_history(&counts);
        assert_eq!(ys(&history.daily), vec![3.0, 5.0, 2.0]);
        assert_eq!(ys(&history.total), vec![3.0, 8.0, 10.0]);
        assert_eq!(history.daily[1].x, day(2));
        assert_eq!(history.daily[1].end_ts, day(3));
    }

    #[test]
    fn test_count_history_keeps_empty_days_when_asked() {
        let counts = series(&[(3.0, day(0)), (5.0, day(2))]);

        let history = HistoryProjector::new(false).count_history(&counts);
        assert_eq!(ys(&history.daily), vec![3.0, 0.0, 5.0]);
        assert_eq!(ys(&history.total), vec![3.0, 3.0, 8.0]);
    }

    #[test]
    fn test_win_rate_history_uses_independent_running_totals() {
        let win = series(&[(3.0, day(0)), (1.0, day(1)), (0.0, day(3))]);
        let lose = series(&[(1.0, day(0)), (2.0, day(1)), (0.0, day(3))]);

        let history = HistoryProjector::default().win_rate_history(&win, &lose);
        assert_eq!(history.len(), 3);
        assert_eq!(ys(&history.daily), vec![75.0, 33.3, 0.0]);
        assert_eq!(ys(&history.total), vec![75.0, 57.1, 57.1]);
    }

    #[test]
    fn test_win_lose_history_skips_only_when_both_empty() {
        let win = series(&[(2.0, day(0)), (4.0, day(2))]);
        let lose = series(&[(1.0, day(0)), (3.0, day(2))]);

        let (win_history, lose_history) = HistoryProjector::default().win_lose_history(&win, &lose);
        assert_eq!(ys(&win_history.total), vec![2.0, 6.0]);
        assert_eq!(ys(&lose_history.daily), vec![1.0, 3.0]);
        assert_eq!(ys(&lose_history.total), vec![1.0, 4.0]);
    }

    #[test]
    fn test_average_history_never_divides_by_zero() {
        let kills = series(&[(10.0, day(0)), (0.0, day(2))]);
        let battles = series(&[(4.0, day(0)), (0.0, day(2))]);

        let history = HistoryProjector::new(false).average_history(&kills, &battles);
        assert_eq!(ys(&history.daily), vec![2.5, 0.0, 0.0]);
        assert_eq!(ys(&history.total), vec![2.5, 2.5, 2.5]);
    }

    #[test]
    fn test_series_options_from_config() {
        let mut config = AnalyticsConfig::default();
        config.series.bucket_duration_ms = 2 * DAY_MS;
        config.series.max_bucket_count = 2;
        config.series.fixed_grid = true;
        config.history.ignore_empty_periods = false;

        let projector = HistoryProjector::try_from(&config).unwrap();
        assert!(!projector.ignore_empty_periods);
        let counts = projector.series((0..8).map(|n| Observation::new(1.0, day(n))));

        // Two-day buckets on a fixed grid, only the last two retained.
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.first_bucket().map(|b| (b.start_time, b.sum())), Some((day(4), 2.0)));
        assert_eq!(projector.count_history(&counts).total.last().map(|p| p.y), Some(4.0));

        config.series.bucket_duration_ms = 0;
        assert!(HistoryProjector::try_from(&config).is_err());
    }

    #[test]
    fn test_round_rate() {
        assert_eq!(round_rate(0.5678), 56.8);
        assert_eq!(round_rate(1.0), 100.0);
        assert_eq!(round_rate(0.0), 0.0);
    }
}
