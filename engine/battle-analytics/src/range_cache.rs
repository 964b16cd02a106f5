//! # Range Cache
//!
//! Incremental cache of time-scoped snapshots per partition key. Callers ask
//! for a time range; only the sub-ranges not yet covered are fetched from
//! the [`SnapshotFetcher`], merged into the sorted snapshot list, and added
//! to the key's coverage set.
//!
//! Concurrent callers never fetch the same span twice: gaps are reserved in
//! a per-key in-flight set before the fetch is awaited, and a caller whose
//! gaps are already in flight waits for that fetch to settle and then
//! recomputes what is still missing.

use crate::config::CacheConfig;
use crate::coverage::{IntervalSet, TimeRange};
use crate::error::{AnalyticsError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Display;
use std::hash::Hash;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A value that covers a time window
pub trait TimeScoped {
    fn start_timestamp(&self) -> i64;

    /// Exclusive
    fn end_timestamp(&self) -> i64;
}

/// External collaborator that loads snapshots for one key and range
#[async_trait]
pub trait SnapshotFetcher<K, S>: Send + Sync
where
    K: Send + Sync,
    S: Send,
{
    /// Snapshots whose start lies in `range`; may be empty
    async fn fetch(&self, key: &K, range: TimeRange) -> anyhow::Result<Vec<S>>;
}

struct KeyState<S> {
    coverage: IntervalSet,
    /// Sorted by start timestamp
    snapshots: Vec<S>,
    in_flight: IntervalSet,
    generation: u64,
    settled: watch::Sender<u64>,
}

impl<S> KeyState<S> {
    fn new() -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            coverage: IntervalSet::new(),
            snapshots: Vec::new(),
            in_flight: IntervalSet::new(),
            generation: 0,
            settled,
        }
    }

    fn notify(&self) {
        self.settled.send_modify(|count| *count += 1);
    }
}

enum Plan {
    Done,
    Wait(watch::Receiver<u64>),
    Fetch(Vec<TimeRange>),
}

/// Per-key incremental snapshot cache
pub struct RangeCache<K, S, F>
where
    K: Eq + Hash,
{
    fetcher: F,
    config: CacheConfig,
    state: DashMap<K, KeyState<S>>,
}

impl<K, S, F> RangeCache<K, S, F>
where
    K: Eq + Hash + Clone + Display + Send + Sync,
    S: TimeScoped + Clone + Send + Sync,
    F: SnapshotFetcher<K, S>,
{
    pub fn new(fetcher: F) -> Self {
        Self::with_config(fetcher, CacheConfig::default())
    }

    pub fn with_config(fetcher: F, config: CacheConfig) -> Self {
        Self { fetcher, config, state: DashMap::new() }
    }

    /// Cache pre-populated with already covered ranges and their snapshots
    pub fn with_initial(
        fetcher: F,
        config: CacheConfig,
        initial: impl IntoIterator<Item = (K, IntervalSet, Vec<S>)>,
    ) -> Self {
        let cache = Self::with_config(fetcher, config);
        for (key, coverage, mut snapshots) in initial {
            snapshots.sort_by_key(|s| s.start_timestamp());
            let mut state = KeyState::new();
            state.generation = u64::from(!coverage.is_empty());
            state.coverage = coverage;
            state.snapshots = snapshots;
            cache.state.insert(key, state);
        }
        cache
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Make sure `range` is covered for `key`, fetching only what is missing,
    /// and return every cached snapshot overlapping it.
    pub async fn ensure_range(&self, key: &K, range: TimeRange) -> Result<Vec<S>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        loop {
            match self.plan(key, range) {
                Plan::Done => break,
                Plan::Wait(mut settled) => {
                    debug!("Waiting for in-flight fetch of {} over {}", key, range);
                    // A closed channel means the key was torn down; recompute either way.
                    let _ = settled.changed().await;
                }
                Plan::Fetch(gaps) => self.fetch_gaps(key, gaps).await?,
            }
        }

        Ok(self.find(key, range))
    }

    /// Reserve the uncovered, not-yet-in-flight parts of `range`
    fn plan(&self, key: &K, range: TimeRange) -> Plan {
        let mut state = self.state.entry(key.clone()).or_insert_with(KeyState::new);

        let missing = state.coverage.missing(range);
        if missing.is_empty() {
            return Plan::Done;
        }

        let free: Vec<TimeRange> = missing.iter().flat_map(|gap| state.in_flight.missing(*gap)).collect();
        if free.is_empty() {
            return Plan::Wait(state.settled.subscribe());
        }

        for gap in &free {
            state.in_flight.insert(*gap);
        }
        Plan::Fetch(free)
    }

    async fn fetch_gaps(&self, key: &K, gaps: Vec<TimeRange>) -> Result<()> {
        let mut reservation = Reservation { state: &self.state, key, pending: gaps.clone() };

        for gap in gaps {
            debug!("Fetching {} over {}", key, gap);
            let snapshots = match self.fetcher.fetch(key, gap).await {
                Ok(snapshots) => snapshots,
                Err(source) => {
                    warn!("Fetch of {} over {} failed: {:#}", key, gap, source);
                    return Err(AnalyticsError::fetch(key, gap, source));
                }
            };
            self.merge(key, gap, snapshots);
            reservation.pending.retain(|pending| *pending != gap);
        }
        Ok(())
    }

    fn merge(&self, key: &K, gap: TimeRange, fetched: Vec<S>) {
        let Some(mut state) = self.state.get_mut(key) else {
            debug!("Dropping fetch result for {} over {}: cache was torn down", key, gap);
            return;
        };

        let received = fetched.len();
        let mut merged = 0;
        for snapshot in fetched {
            let start = snapshot.start_timestamp();
            if !gap.contains(start) && self.config.drop_out_of_range {
                warn!("Dropping snapshot of {} starting at {} outside {}", key, start, gap);
                continue;
            }
            // Kept out-of-range snapshots are not covered, so a later gap may return them again.
            if state.snapshots.iter().any(|s| s.start_timestamp() == start) {
                continue;
            }
            let position = state.snapshots.partition_point(|s| s.start_timestamp() <= start);
            state.snapshots.insert(position, snapshot);
            merged += 1;
        }

        state.coverage.insert(gap);
        state.in_flight.remove(gap);
        state.generation += 1;
        state.notify();

        info!("Merged {}/{} snapshots for {} over {}", merged, received, key, gap);
    }

    /// Cached snapshots overlapping `range`; never fetches
    pub fn find(&self, key: &K, range: TimeRange) -> Vec<S> {
        self.state
            .get(key)
            .map(|state| {
                state
                    .snapshots
                    .iter()
                    .filter(|s| s.start_timestamp() < range.end && range.start < s.end_timestamp())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every cached snapshot for `key`, sorted by start
    pub fn snapshots(&self, key: &K) -> Vec<S> {
        self.state.get(key).map(|state| state.snapshots.clone()).unwrap_or_default()
    }

    pub fn coverage(&self, key: &K) -> IntervalSet {
        self.state.get(key).map(|state| state.coverage.clone()).unwrap_or_default()
    }

    /// Bumped every time something is merged for `key`
    pub fn generation(&self, key: &K) -> u64 {
        self.state.get(key).map_or(0, |state| state.generation)
    }

    pub fn is_covered(&self, key: &K, range: TimeRange) -> bool {
        self.state.get(key).is_some_and(|state| state.coverage.covers(&range))
    }

    /// Drop every key; fetches still in flight are discarded when they settle
    pub fn teardown(&self) {
        let keys = self.state.len();
        self.state.clear();
        info!("Range cache torn down ({} keys)", keys);
    }
}

/// Releases in-flight reservations that were not merged, including when the
/// fetching future is dropped.
struct Reservation<'a, K, S>
where
    K: Eq + Hash,
{
    state: &'a DashMap<K, KeyState<S>>,
    key: &'a K,
    pending: Vec<TimeRange>,
}

impl<K, S> Drop for Reservation<'_, K, S>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(mut state) = self.state.get_mut(self.key) {
            for gap in self.pending.drain(..) {
                state.in_flight.remove(gap);
            }
            state.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::DAY_MS;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Daily {
        start: i64,
    }

    impl TimeScoped for Daily {
        fn start_timestamp(&self) -> i64 {
            self.start
        }

        fn end_timestamp(&self) -> i64 {
            self.start + DAY_MS
        }
    }

    /// One snapshot per day in the requested range
    #[derive(Default)]
    struct DailyFetcher {
        calls: Mutex<Vec<TimeRange>>,
        fail: AtomicBool,
        delay: Option<Duration>,
        stray: bool,
    }

    impl DailyFetcher {
        fn calls(&self) -> Vec<TimeRange> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SnapshotFetcher<String, Daily> for DailyFetcher {
        async fn fetch(&self, _key: &String, range: TimeRange) -> anyhow::Result<Vec<Daily>> {
            self.calls.lock().push(range);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("backend unavailable");
            }
            let mut days: Vec<Daily> = (range.start / DAY_MS..range.end / DAY_MS)
                .map(|d| Daily { start: d * DAY_MS })
                .collect();
            if self.stray {
                days.push(Daily { start: range.end + 7 * DAY_MS });
            }
            Ok(days)
        }
    }

    fn days(from: i64, to: i64) -> TimeRange {
        TimeRange::new(from * DAY_MS, to * DAY_MS)
    }

    fn key() -> String {
        "x_match|all".to_string()
    }

    #[tokio::test]
    async fn test_extending_range_fetches_only_the_back_gap() {
        let cache = RangeCache::new(DailyFetcher::default());

        let first = cache.ensure_range(&key(), days(1, 10)).await.unwrap();
        assert_eq!(first.len(), 9);

        let second = cache.ensure_range(&key(), days(1, 15)).await.unwrap();
        assert_eq!(second.len(), 14);
        assert_eq!(cache.fetcher().calls(), vec![days(1, 10), days(10, 15)]);
        assert_eq!(cache.coverage(&key()).iter().collect::<Vec<_>>(), vec![days(1, 15)]);
    }

    #[tokio::test]
    async fn test_front_and_interior_gaps() {
        let cache = RangeCache::new(DailyFetcher::default());
        cache.ensure_range(&key(), days(5, 7)).await.unwrap();
        cache.ensure_range(&key(), days(9, 11)).await.unwrap();

        let all = cache.ensure_range(&key(), days(3, 12)).await.unwrap();
        assert_eq!(all.len(), 9);
        assert_eq!(&cache.fetcher().calls()[2..], &[days(3, 5), days(7, 9), days(11, 12)]);

        let starts: Vec<i64> = cache.snapshots(&key()).iter().map(|s| s.start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[tokio::test]
    async fn test_repeated_call_is_served_from_cache() {
        let cache = RangeCache::new(DailyFetcher::default());
        let first = cache.ensure_range(&key(), days(0, 4)).await.unwrap();
        let generation = cache.generation(&key());

        let second = cache.ensure_range(&key(), days(0, 4)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.fetcher().calls().len(), 1);
        assert_eq!(cache.generation(&key()), generation);
        assert!(cache.is_covered(&key(), days(1, 3)));
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_state_unchanged() {
        let cache = RangeCache::new(DailyFetcher::default());
        cache.ensure_range(&key(), days(0, 3)).await.unwrap();
        let coverage = cache.coverage(&key());
        let snapshots = cache.snapshots(&key());

        cache.fetcher().fail.store(true, Ordering::SeqCst);
        let err = cache.ensure_range(&key(), days(0, 6)).await.unwrap_err();
        assert!(err.is_fetch());
        assert_eq!(cache.coverage(&key()), coverage);
        assert_eq!(cache.snapshots(&key()), snapshots);

        // The reservation was released, so a retry fetches the same gap again.
        cache.fetcher().fail.store(false, Ordering::SeqCst);
        let all = cache.ensure_range(&key(), days(0, 6)).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(cache.fetcher().calls(), vec![days(0, 3), days(3, 6), days(3, 6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let fetcher = DailyFetcher { delay: Some(Duration::from_millis(50)), ..Default::default() };
        let cache = RangeCache::new(fetcher);

        let (k1, k2) = (key(), key());
        let (a, b) = tokio::join!(
            cache.ensure_range(&k1, days(0, 5)),
            cache.ensure_range(&k2, days(2, 5)),
        );

        assert_eq!(a.unwrap().len(), 5);
        assert_eq!(b.unwrap().len(), 3);
        assert_eq!(cache.fetcher().calls(), vec![days(0, 5)]);
    }

    #[tokio::test]
    async fn test_out_of_range_snapshots_are_dropped() {
        let cache = RangeCache::new(DailyFetcher { stray: true, ..Default::default() });
        cache.ensure_range(&key(), days(0, 2)).await.unwrap();
        assert_eq!(cache.snapshots(&key()).len(), 2);
    }

    #[tokio::test]
    async fn test_kept_stray_is_not_merged_twice() {
        let fetcher = DailyFetcher { stray: true, ..Default::default() };
        let cache = RangeCache::with_config(fetcher, CacheConfig { drop_out_of_range: false });

        // Day 9 arrives as a stray and stays outside coverage.
        cache.ensure_range(&key(), days(0, 2)).await.unwrap();
        assert_eq!(cache.snapshots(&key()).len(), 3);
        assert!(!cache.is_covered(&key(), days(9, 10)));

        // The next gap returns day 9 again, plus a new stray on day 19.
        cache.ensure_range(&key(), days(0, 12)).await.unwrap();
        let starts: Vec<i64> = cache.snapshots(&key()).iter().map(|s| s.start / DAY_MS).collect();
        assert_eq!(starts, (0..12).chain([19]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_coverage_only_grows() {
        let cache = RangeCache::new(DailyFetcher::default());
        let mut previous = IntervalSet::new();

        for range in [days(4, 6), days(1, 2), days(5, 9), days(0, 3), days(2, 4)] {
            cache.ensure_range(&key(), range).await.unwrap();
            let coverage = cache.coverage(&key());
            assert!(previous.iter().all(|r| coverage.covers(&r)));
            assert!(coverage.covers(&range));
            let members: Vec<TimeRange> = coverage.iter().collect();
            assert!(members.windows(2).all(|pair| pair[0].end < pair[1].start));
            previous = coverage;
        }
        assert_eq!(previous.len(), 1);
    }

    #[tokio::test]
    async fn test_with_initial_and_teardown() {
        let mut coverage = IntervalSet::new();
        coverage.insert(days(0, 2));
        let seeded = vec![Daily { start: DAY_MS }, Daily { start: 0 }];
        let cache = RangeCache::with_initial(
            DailyFetcher::default(),
            CacheConfig::default(),
            [(key(), coverage, seeded)],
        );

        let found = cache.ensure_range(&key(), days(0, 2)).await.unwrap();
        assert_eq!(found, vec![Daily { start: 0 }, Daily { start: DAY_MS }]);
        assert!(cache.fetcher().calls().is_empty());

        cache.teardown();
        assert!(cache.snapshots(&key()).is_empty());
        assert_eq!(cache.generation(&key()), 0);
        assert!(cache.find(&key(), days(0, 2)).is_empty());
    }

    #[tokio::test]
    async fn test_find_never_fetches() {
        let cache = RangeCache::new(DailyFetcher::default());
        assert!(cache.find(&key(), days(0, 3)).is_empty());
        assert!(cache.fetcher().calls().is_empty());

        assert!(cache.ensure_range(&key(), days(3, 3)).await.unwrap().is_empty());
        assert!(cache.fetcher().calls().is_empty());
    }
}
