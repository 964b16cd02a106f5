//! # Coverage Tracking
//!
//! Half-open time ranges and a disjoint interval set used to remember which
//! spans of a partition have already been fetched (or are being fetched).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

/// Half-open time range `[start, end)` in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// A range with no room for any timestamp
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let range = TimeRange::new(self.start.max(other.start), self.end.min(other.end));
        (!range.is_empty()).then_some(range)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Sorted set of disjoint, non-adjacent half-open ranges.
///
/// Inserting a range that touches or overlaps existing members coalesces
/// them, so the set is always in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: BTreeMap<i64, i64>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeRange> + '_ {
        self.ranges.iter().map(|(&start, &end)| TimeRange::new(start, end))
    }

    pub fn first(&self) -> Option<TimeRange> {
        self.ranges.iter().next().map(|(&start, &end)| TimeRange::new(start, end))
    }

    pub fn last(&self) -> Option<TimeRange> {
        self.ranges.iter().next_back().map(|(&start, &end)| TimeRange::new(start, end))
    }

    /// Smallest range enclosing every member
    pub fn span(&self) -> Option<TimeRange> {
        Some(TimeRange::new(self.first()?.start, self.last()?.end))
    }

    /// Add a range, coalescing with touching members.
    ///
    /// Returns `true` when the covered set grew.
    pub fn insert(&mut self, range: TimeRange) -> bool {
        if range.is_empty() || self.covers(&range) {
            return false;
        }

        let mut start = range.start;
        let mut end = range.end;

        // Members are sorted by start and disjoint, so their ends are sorted too.
        let touching: Vec<i64> = self
            .ranges
            .range(..=range.end)
            .rev()
            .take_while(|(_, &member_end)| member_end >= range.start)
            .map(|(&member_start, _)| member_start)
            .collect();

        for member_start in touching {
            if let Some(member_end) = self.ranges.remove(&member_start) {
                start = start.min(member_start);
                end = end.max(member_end);
            }
        }

        self.ranges.insert(start, end);
        true
    }

    /// Remove a range, splitting members that straddle its edges
    pub fn remove(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }

        let overlapping: Vec<(i64, i64)> = self
            .ranges
            .range(..range.end)
            .rev()
            .take_while(|(_, &member_end)| member_end > range.start)
            .map(|(&start, &end)| (start, end))
            .collect();

        for (start, end) in overlapping {
            self.ranges.remove(&start);
            if start < range.start {
                self.ranges.insert(start, range.start);
            }
            if range.end < end {
                self.ranges.insert(range.end, end);
            }
        }
    }

    /// Whether every timestamp of `range` is covered
    pub fn covers(&self, range: &TimeRange) -> bool {
        if range.is_empty() {
            return true;
        }
        self.ranges
            .range(..=range.start)
            .next_back()
            .is_some_and(|(_, &end)| end >= range.end)
    }

    /// Whether any timestamp of `range` is covered
    pub fn intersects(&self, range: &TimeRange) -> bool {
        if range.is_empty() {
            return false;
        }
        self.ranges
            .range(..range.end)
            .next_back()
            .is_some_and(|(_, &end)| end > range.start)
    }

    /// Sub-ranges of `range` that are not covered, in ascending order.
    ///
    /// With a single contiguous member this yields at most a front gap and a
    /// back gap; fragmented coverage also yields the interior holes.
    pub fn missing(&self, range: TimeRange) -> Vec<TimeRange> {
        let mut gaps = Vec::new();
        if range.is_empty() {
            return gaps;
        }

        let mut cursor = range.start;
        let leading = self.ranges.range(..=range.start).next_back();
        let inner = self.ranges.range((Excluded(range.start), Unbounded));

        for (&start, &end) in leading.into_iter().chain(inner) {
            if start >= range.end || cursor >= range.end {
                break;
            }
            if end <= cursor {
                continue;
            }
            if start > cursor {
                gaps.push(TimeRange::new(cursor, start));
            }
            cursor = end;
        }

        if cursor < range.end {
            gaps.push(TimeRange::new(cursor, range.end));
        }
        gaps
    }
}

impl FromIterator<TimeRange> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = TimeRange>>(iter: T) -> Self {
        let mut set = IntervalSet::new();
        for range in iter {
            set.insert(range);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: i64, end: i64) -> TimeRange {
        TimeRange::new(start, end)
    }

    #[test]
    fn test_range_overlap_and_intersection() {
        assert!(r(0, 10).overlaps(&r(9, 12)));
        assert!(!r(0, 10).overlaps(&r(10, 12)));
        assert_eq!(r(0, 10).intersect(&r(5, 20)), Some(r(5, 10)));
        assert_eq!(r(0, 10).intersect(&r(10, 20)), None);
        assert!(r(5, 5).is_empty());
    }

    #[test]
    fn test_insert_coalesces_adjacent_and_overlapping() {
        let mut set = IntervalSet::new();
        assert!(set.insert(r(0, 10)));
        assert!(set.insert(r(10, 20)));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![r(0, 20)]);

        assert!(set.insert(r(30, 40)));
        assert!(set.insert(r(15, 35)));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![r(0, 40)]);

        assert!(!set.insert(r(5, 25)));
        assert!(!set.insert(r(7, 7)));
    }

    #[test]
    fn test_insert_keeps_members_disjoint_and_sorted() {
        let set: IntervalSet = vec![r(50, 60), r(0, 5), r(20, 30), r(4, 8)].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![r(0, 8), r(20, 30), r(50, 60)]);
        assert_eq!(set.span(), Some(r(0, 60)));
    }

    #[test]
    fn test_missing_front_and_back_gaps() {
        let set: IntervalSet = vec![r(10, 20)].into_iter().collect();
        assert_eq!(set.missing(r(0, 30)), vec![r(0, 10), r(20, 30)]);
        assert_eq!(set.missing(r(10, 30)), vec![r(20, 30)]);
        assert_eq!(set.missing(r(0, 20)), vec![r(0, 10)]);
        assert!(set.missing(r(12, 18)).is_empty());
        assert_eq!(set.missing(r(25, 30)), vec![r(25, 30)]);
    }

    #[test]
    fn test_missing_interior_holes() {
        let set: IntervalSet = vec![r(0, 10), r(20, 30), r(40, 50)].into_iter().collect();
        assert_eq!(set.missing(r(5, 45)), vec![r(10, 20), r(30, 40)]);
        assert_eq!(set.missing(r(-5, 60)), vec![r(-5, 0), r(10, 20), r(30, 40), r(50, 60)]);
    }

    #[test]
    fn test_remove_splits_members() {
        let mut set: IntervalSet = vec![r(0, 100)].into_iter().collect();
        set.remove(r(40, 60));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![r(0, 40), r(60, 100)]);

        set.remove(r(30, 70));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![r(0, 30), r(70, 100)]);

        set.remove(r(0, 100));
        assert!(set.is_empty());
    }

    #[test]
    fn test_covers_and_intersects() {
        let set: IntervalSet = vec![r(0, 10), r(20, 30)].into_iter().collect();
        assert!(set.covers(&r(2, 8)));
        assert!(!set.covers(&r(5, 25)));
        assert!(set.intersects(&r(5, 25)));
        assert!(!set.intersects(&r(10, 20)));
        assert!(set.covers(&r(3, 3)));
    }
}
