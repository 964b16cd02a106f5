//! # Aggregate Algebra
//!
//! Structural add/subtract over typed count trees. Every tree type in the
//! crate implements [`Aggregate`], so only trees of the same schema can be
//! merged.
//!
//! Subtraction saturates at zero: removing more battles than were recorded
//! leaves an empty leaf rather than a negative count, and map entries that
//! subtraction empties are removed. As a consequence `sub(add(a, b), b) == a`
//! only holds while no leaf is clamped and `a` carries no explicit zero
//! entries on paths it shares with `b`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value that can be merged with another of the same shape
pub trait Aggregate {
    /// Fold `other` into `self`; paths missing in `self` are copied in
    fn merge_add(&mut self, other: &Self);

    /// Remove `other` from `self`, clamping at zero; paths missing in `self` are ignored
    fn merge_sub(&mut self, other: &Self);

    /// Nothing counted. Map entries in this state are dropped by `merge_sub`.
    fn is_zero(&self) -> bool {
        false
    }
}

/// `a + b` without touching either input
pub fn add<T: Aggregate + Clone>(a: &T, b: &T) -> T {
    let mut result = a.clone();
    result.merge_add(b);
    result
}

/// `a - b` without touching either input, clamping every leaf at zero
pub fn sub<T: Aggregate + Clone>(a: &T, b: &T) -> T {
    let mut result = a.clone();
    result.merge_sub(b);
    result
}

/// Fold a sequence with [`add`]; `None` for an empty sequence
pub fn sum_all<'a, T, I>(items: I) -> Option<T>
where
    T: Aggregate + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut iter = items.into_iter();
    let mut total = iter.next()?.clone();
    for item in iter {
        total.merge_add(item);
    }
    Some(total)
}

impl Aggregate for u64 {
    fn merge_add(&mut self, other: &Self) {
        *self = self.saturating_add(*other);
    }

    fn merge_sub(&mut self, other: &Self) {
        *self = self.saturating_sub(*other);
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl<K, V> Aggregate for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Aggregate + Clone,
{
    fn merge_add(&mut self, other: &Self) {
        for (key, value) in other {
            match self.get_mut(key) {
                Some(existing) => existing.merge_add(value),
                None => {
                    self.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn merge_sub(&mut self, other: &Self) {
        for (key, value) in other {
            if let Some(existing) = self.get_mut(key) {
                existing.merge_sub(value);
                if existing.is_zero() {
                    self.remove(key);
                }
            }
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// Win/lose pair leaf
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinLose {
    pub win: u64,
    pub lose: u64,
}

impl WinLose {
    pub fn new(win: u64, lose: u64) -> Self {
        Self { win, lose }
    }

    pub fn total(&self) -> u64 {
        self.win.saturating_add(self.lose)
    }

    /// `win / (win + lose)`, 0 when nothing was played
    pub fn rate(&self) -> f64 {
        win_rate(self.win as f64, self.lose as f64)
    }
}

impl Aggregate for WinLose {
    fn merge_add(&mut self, other: &Self) {
        self.win = self.win.saturating_add(other.win);
        self.lose = self.lose.saturating_add(other.lose);
    }

    fn merge_sub(&mut self, other: &Self) {
        self.win = self.win.saturating_sub(other.win);
        self.lose = self.lose.saturating_sub(other.lose);
    }

    fn is_zero(&self) -> bool {
        self.win == 0 && self.lose == 0
    }
}

/// `win / (win + lose)`, 0 when both are 0
pub fn win_rate(win: f64, lose: f64) -> f64 {
    if win > 0.0 || lose > 0.0 {
        win / (win + lose)
    } else {
        0.0
    }
}
