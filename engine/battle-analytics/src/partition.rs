//! Partition keys: the match-type × rate-band axes under which snapshots
//! are cached independently, and per-user keys for personal statistics.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Match type axis; `All` is the unpartitioned superset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    All,
    Unknown,
    RegularMatch,
    BankaraMatch,
    XMatch,
    EventMatch,
    FesMatch,
    PrivMatch,
}

impl MatchType {
    pub const ALL: [MatchType; 8] = [
        MatchType::All,
        MatchType::Unknown,
        MatchType::RegularMatch,
        MatchType::BankaraMatch,
        MatchType::XMatch,
        MatchType::EventMatch,
        MatchType::FesMatch,
        MatchType::PrivMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::All => "all",
            MatchType::Unknown => "unknown",
            MatchType::RegularMatch => "regular_match",
            MatchType::BankaraMatch => "bankara_match",
            MatchType::XMatch => "x_match",
            MatchType::EventMatch => "event_match",
            MatchType::FesMatch => "fes_match",
            MatchType::PrivMatch => "priv_match",
        }
    }

    /// Only X match is split into rate bands
    pub fn has_rate_bands(&self) -> bool {
        matches!(self, MatchType::XMatch)
    }
}

/// Rate band axis; `All` is the union across every band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchRate {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "under_1500")]
    Under1500,
    #[serde(rename = "1500_2000")]
    From1500To2000,
    #[serde(rename = "2000_2500")]
    From2000To2500,
    #[serde(rename = "2500_3000")]
    From2500To3000,
    #[serde(rename = "3000_3500")]
    From3000To3500,
    #[serde(rename = "3500_4000")]
    From3500To4000,
    #[serde(rename = "upper_4000")]
    Upper4000,
}

impl MatchRate {
    /// Every concrete band, excluding `All`
    pub const BANDS: [MatchRate; 7] = [
        MatchRate::Under1500,
        MatchRate::From1500To2000,
        MatchRate::From2000To2500,
        MatchRate::From2500To3000,
        MatchRate::From3000To3500,
        MatchRate::From3500To4000,
        MatchRate::Upper4000,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRate::All => "all",
            MatchRate::Under1500 => "under_1500",
            MatchRate::From1500To2000 => "1500_2000",
            MatchRate::From2000To2500 => "2000_2500",
            MatchRate::From2500To3000 => "2500_3000",
            MatchRate::From3000To3500 => "3000_3500",
            MatchRate::From3500To4000 => "3500_4000",
            MatchRate::Upper4000 => "upper_4000",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MatchRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        MatchType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AnalyticsError::invalid_partition(format!("unknown match type: {s}")))
    }
}

impl FromStr for MatchRate {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        std::iter::once(MatchRate::All)
            .chain(MatchRate::BANDS)
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AnalyticsError::invalid_partition(format!("unknown match rate: {s}")))
    }
}

/// Composite partition key `(match_type, match_rate)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawPartitionKey")]
pub struct PartitionKey {
    pub match_type: MatchType,
    pub match_rate: MatchRate,
}

/// Wire shape of [`PartitionKey`] before rate folding
#[derive(Deserialize)]
struct RawPartitionKey {
    match_type: MatchType,
    match_rate: MatchRate,
}

impl From<RawPartitionKey> for PartitionKey {
    fn from(raw: RawPartitionKey) -> Self {
        Self::new(raw.match_type, raw.match_rate)
    }
}

impl PartitionKey {
    /// Builds a key; rate bands are folded to `All` for match types without them
    pub fn new(match_type: MatchType, match_rate: MatchRate) -> Self {
        let match_rate = if match_type.has_rate_bands() { match_rate } else { MatchRate::All };
        Self { match_type, match_rate }
    }

    /// `all|all`
    pub fn global() -> Self {
        Self::new(MatchType::All, MatchRate::All)
    }

    pub fn match_type(match_type: MatchType) -> Self {
        Self::new(match_type, MatchRate::All)
    }

    pub fn x_match(match_rate: MatchRate) -> Self {
        Self::new(MatchType::XMatch, match_rate)
    }

    /// Whether this key is the union of several independently cached rate partitions
    pub fn is_rate_union(&self) -> bool {
        self.match_type.has_rate_bands() && self.match_rate == MatchRate::All
    }

    /// The union key a rate band belongs to; `None` for unions and unbanded keys
    pub fn rate_union(&self) -> Option<PartitionKey> {
        (self.match_type.has_rate_bands() && self.match_rate != MatchRate::All)
            .then(|| PartitionKey::new(self.match_type, MatchRate::All))
    }

    /// Rate partitions folded together by a union key; empty for any other key
    pub fn constituents(&self) -> Vec<PartitionKey> {
        if !self.is_rate_union() {
            return Vec::new();
        }
        MatchRate::BANDS.into_iter().map(|rate| PartitionKey::new(self.match_type, rate)).collect()
    }
}

impl Default for PartitionKey {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.match_type, self.match_rate)
    }
}

impl FromStr for PartitionKey {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        let (match_type, match_rate) = match s.split_once('|') {
            Some((match_type, match_rate)) => (match_type.parse()?, match_rate.parse()?),
            None => (s.parse()?, MatchRate::All),
        };
        Ok(PartitionKey::new(match_type, match_rate))
    }
}

/// Per-user partition key for personal statistics
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
