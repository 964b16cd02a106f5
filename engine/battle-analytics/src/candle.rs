//! # Candle Series
//!
//! Fixed-width time bucketing of scalar observations. Observations may
//! arrive out of order and sparsely; the series keeps its buckets sorted by
//! start time and, when gap filling is enabled, contiguous.

use crate::config::SeriesConfig;
use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One day in milliseconds
pub const DAY_MS: i64 = 86_400_000;

/// A single scalar sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    pub timestamp: i64,
}

impl Observation {
    pub fn new(value: f64, timestamp: i64) -> Self {
        Self { value, timestamp }
    }
}

/// A fixed-duration window accumulating observations in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start_time: i64,
    /// Exclusive
    pub end_time: i64,
    pub values: Vec<Observation>,
}

impl Bucket {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self { start_time, end_time, values: Vec::new() }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start_time <= timestamp && timestamp < self.end_time
    }

    /// Append an observation if it falls inside this bucket
    pub fn add_value(&mut self, observation: Observation) -> bool {
        if !self.contains(observation.timestamp) {
            return false;
        }
        self.values.push(observation);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First inserted observation
    pub fn open_value(&self) -> Option<&Observation> {
        self.values.first()
    }

    /// Last inserted observation (insertion order, not timestamp order)
    pub fn close_value(&self) -> Option<&Observation> {
        self.values.last()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().map(|v| v.value).sum()
    }

    /// Mean of the contained values, 0 for an empty bucket
    pub fn average(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sum() / self.values.len() as f64
        }
    }
}

/// Construction options for a [`CandleSeries`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesOptions {
    pub bucket_duration: i64,
    /// 0 = unbounded
    pub max_bucket_count: usize,
    pub fill_gaps: bool,
    /// Align buckets to multiples of `bucket_duration` from the epoch. When off,
    /// the grid is anchored at the first observation the series ever sees, so
    /// every later bucket lands on that same grid and gap filling stays contiguous.
    pub fixed_grid: bool,
}

impl SeriesOptions {
    /// One-day buckets, unbounded, gap-filled, grid anchored at the first observation
    pub fn daily() -> Self {
        Self { bucket_duration: DAY_MS, max_bucket_count: 0, fill_gaps: true, fixed_grid: false }
    }
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self::daily()
    }
}

impl From<&SeriesConfig> for SeriesOptions {
    fn from(config: &SeriesConfig) -> Self {
        Self {
            bucket_duration: config.bucket_duration_ms,
            max_bucket_count: config.max_bucket_count,
            fill_gaps: config.fill_gaps,
            fixed_grid: config.fixed_grid,
        }
    }
}

/// Ordered sequence of fixed-duration buckets
#[derive(Debug, Clone)]
pub struct CandleSeries {
    options: SeriesOptions,
    /// Grid origin when `fixed_grid` is off; set by the first observation ever inserted
    origin: Option<i64>,
    buckets: VecDeque<Bucket>,
}

impl CandleSeries {
    /// Create an empty series
    pub fn new(options: SeriesOptions) -> Result<Self> {
        if options.bucket_duration <= 0 {
            return Err(AnalyticsError::config(format!(
                "bucket duration must be positive, got {}",
                options.bucket_duration
            )));
        }
        Ok(Self { options, origin: None, buckets: VecDeque::new() })
    }

    /// Create an empty series with [`SeriesOptions::daily`]
    pub fn daily() -> Self {
        Self { options: SeriesOptions::daily(), origin: None, buckets: VecDeque::new() }
    }

    pub fn options(&self) -> &SeriesOptions {
        &self.options
    }

    pub fn bucket_duration(&self) -> i64 {
        self.options.bucket_duration
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn first_bucket(&self) -> Option<&Bucket> {
        self.buckets.front()
    }

    pub fn last_bucket(&self) -> Option<&Bucket> {
        self.buckets.back()
    }

    /// Positional lookup, `None` when out of range
    pub fn get_bucket(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(index)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> + '_ {
        self.buckets.iter()
    }

    /// Place an observation into its bucket, creating buckets as needed.
    ///
    /// Returns a copy of the newly created bucket, or `None` when the
    /// observation joined an existing bucket.
    pub fn add_value(&mut self, observation: Observation) -> Option<Bucket> {
        let created = self.place(observation);

        if self.options.max_bucket_count > 0 {
            while self.buckets.len() > self.options.max_bucket_count {
                if let Some(evicted) = self.buckets.pop_front() {
                    tracing::trace!(
                        "Evicted bucket [{}, {}) with {} values",
                        evicted.start_time,
                        evicted.end_time,
                        evicted.values.len()
                    );
                }
            }
        }

        created
    }

    fn place(&mut self, observation: Observation) -> Option<Bucket> {
        let timestamp = observation.timestamp;
        let duration = self.options.bucket_duration;

        let (first_start, last_end) = match (self.buckets.front(), self.buckets.back()) {
            (Some(first), Some(last)) => (first.start_time, last.end_time),
            _ => {
                self.origin.get_or_insert(timestamp);
                let bucket = self.make_bucket(observation);
                self.buckets.push_back(bucket.clone());
                return Some(bucket);
            }
        };

        if timestamp < first_start {
            let bucket = self.make_bucket(observation);
            if self.options.fill_gaps {
                let blanks = (bucket.end_time - first_start).abs() / duration;
                for _ in 0..blanks {
                    let next_start = self.buckets.front().map_or(first_start, |b| b.start_time);
                    self.buckets.push_front(Bucket::new(next_start - duration, next_start));
                }
            }
            self.buckets.push_front(bucket.clone());
            return Some(bucket);
        }

        if last_end <= timestamp {
            let bucket = self.make_bucket(observation);
            if self.options.fill_gaps {
                let blanks = (bucket.start_time - last_end) / duration;
                for _ in 0..blanks {
                    let prev_end = self.buckets.back().map_or(last_end, |b| b.end_time);
                    self.buckets.push_back(Bucket::new(prev_end, prev_end + duration));
                }
            }
            self.buckets.push_back(bucket.clone());
            return Some(bucket);
        }

        // Most recent buckets are the likeliest home for late observations.
        if let Some(existing) = self.buckets.iter_mut().rev().find(|b| b.contains(timestamp)) {
            existing.values.push(observation);
            return None;
        }

        // A hole inside the span, only reachable without gap filling.
        let bucket = self.make_bucket(observation);
        let position = self.buckets.partition_point(|b| b.start_time < bucket.start_time);
        self.buckets.insert(position, bucket.clone());
        Some(bucket)
    }

    fn make_bucket(&self, observation: Observation) -> Bucket {
        let (start, end) = self.bucket_period(observation.timestamp);
        let mut bucket = Bucket::new(start, end);
        bucket.values.push(observation);
        bucket
    }

    /// Boundaries of the bucket that would hold `timestamp`.
    ///
    /// A floating grid uses the first observation as its anchor rather than the
    /// epoch, so a one-day grid starts at the hour the first sample arrived.
    pub fn bucket_period(&self, timestamp: i64) -> (i64, i64) {
        let duration = self.options.bucket_duration;
        let anchor = if self.options.fixed_grid { 0 } else { self.origin.unwrap_or(timestamp) };
        let start = timestamp - (timestamp - anchor).rem_euclid(duration);
        (start, start + duration)
    }
}
