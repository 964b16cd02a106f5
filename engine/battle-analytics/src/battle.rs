//! Categorical dimensions shared by every aggregate tree: rule, stage and weapon.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Nested `rule -> stage -> value` map, the innermost level of every tree
pub type RuleStageMap<V> = BTreeMap<Rule, BTreeMap<Stage, V>>;

/// Battle rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Nawabari,
    Area,
    Yagura,
    Hoko,
    Asari,
    Unknown,
}

impl Rule {
    pub const ALL: [Rule; 6] =
        [Rule::Nawabari, Rule::Area, Rule::Yagura, Rule::Hoko, Rule::Asari, Rule::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Nawabari => "nawabari",
            Rule::Area => "area",
            Rule::Yagura => "yagura",
            Rule::Hoko => "hoko",
            Rule::Asari => "asari",
            Rule::Unknown => "unknown",
        }
    }
}

/// Battle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Amabi,
    Cyouzame,
    Gonzui,
    Hirame,
    Kinmedai,
    Konbu,
    Kusaya,
    Mahimahi,
    Mantamaria,
    Masaba,
    Mategai,
    Namerou,
    Nampula,
    Sumeshi,
    Taraport,
    Yagara,
    Yunohana,
    Zatou,
    Takaashi,
    Ohyou,
    Bangaitei,
    Negitoro,
    Map,
    Unknown,
}

impl Stage {
    pub const ALL: [Stage; 24] = [
        Stage::Amabi,
        Stage::Cyouzame,
        Stage::Gonzui,
        Stage::Hirame,
        Stage::Kinmedai,
        Stage::Konbu,
        Stage::Kusaya,
        Stage::Mahimahi,
        Stage::Mantamaria,
        Stage::Masaba,
        Stage::Mategai,
        Stage::Namerou,
        Stage::Nampula,
        Stage::Sumeshi,
        Stage::Taraport,
        Stage::Yagara,
        Stage::Yunohana,
        Stage::Zatou,
        Stage::Takaashi,
        Stage::Ohyou,
        Stage::Bangaitei,
        Stage::Negitoro,
        Stage::Map,
        Stage::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Amabi => "amabi",
            Stage::Cyouzame => "cyouzame",
            Stage::Gonzui => "gonzui",
            Stage::Hirame => "hirame",
            Stage::Kinmedai => "kinmedai",
            Stage::Konbu => "konbu",
            Stage::Kusaya => "kusaya",
            Stage::Mahimahi => "mahimahi",
            Stage::Mantamaria => "mantamaria",
            Stage::Masaba => "masaba",
            Stage::Mategai => "mategai",
            Stage::Namerou => "namerou",
            Stage::Nampula => "nampula",
            Stage::Sumeshi => "sumeshi",
            Stage::Taraport => "taraport",
            Stage::Yagara => "yagara",
            Stage::Yunohana => "yunohana",
            Stage::Zatou => "zatou",
            Stage::Takaashi => "takaashi",
            Stage::Ohyou => "ohyou",
            Stage::Bangaitei => "bangaitei",
            Stage::Negitoro => "negitoro",
            Stage::Map => "map",
            Stage::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rule::ALL
            .into_iter()
            .find(|rule| rule.as_str() == s)
            .ok_or_else(|| format!("unknown rule: {s}"))
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Main weapon identifier as reported by the analyzer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeaponId(pub String);

impl WeaponId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WeaponId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WeaponId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Optional restriction on the categorical dimensions when counting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    pub rule: Option<Rule>,
    pub stage: Option<Stage>,
    pub weapon: Option<WeaponId>,
}

impl CategoryFilter {
    /// Matches everything
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_weapon(mut self, weapon: impl Into<WeaponId>) -> Self {
        self.weapon = Some(weapon.into());
        self
    }

    pub fn matches_weapon(&self, weapon: &WeaponId) -> bool {
        self.weapon.as_ref().is_none_or(|w| w == weapon)
    }

    pub fn matches_rule_stage(&self, rule: Rule, stage: Stage) -> bool {
        self.rule.is_none_or(|r| r == rule) && self.stage.is_none_or(|s| s == stage)
    }

    /// Leaves of a rule/stage map that pass the rule and stage restriction
    pub fn leaves<'a, V>(&'a self, map: &'a RuleStageMap<V>) -> impl Iterator<Item = &'a V> + 'a {
        map.iter().flat_map(move |(rule, stages)| {
            stages
                .iter()
                .filter(move |(stage, _)| self.matches_rule_stage(*rule, **stage))
                .map(|(_, value)| value)
        })
    }
}

/// Sum of the count leaves of a rule/stage map that pass `filter`
pub fn count_leaves(map: &RuleStageMap<u64>, filter: &CategoryFilter) -> u64 {
    filter.leaves(map).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RuleStageMap<u64> {
        let mut map = RuleStageMap::new();
        map.entry(Rule::Area).or_default().insert(Stage::Amabi, 3);
        map.entry(Rule::Area).or_default().insert(Stage::Zatou, 4);
        map.entry(Rule::Hoko).or_default().insert(Stage::Amabi, 5);
        map
    }

    #[test]
    fn test_count_leaves_with_filters() {
        let map = sample();
        assert_eq!(count_leaves(&map, &CategoryFilter::any()), 12);
        assert_eq!(count_leaves(&map, &CategoryFilter::any().with_rule(Rule::Area)), 7);
        assert_eq!(count_leaves(&map, &CategoryFilter::any().with_stage(Stage::Amabi)), 8);
        assert_eq!(
            count_leaves(&map, &CategoryFilter::any().with_rule(Rule::Hoko).with_stage(Stage::Zatou)),
            0
        );
    }

    #[test]
    fn test_rule_and_stage_parse() {
        assert_eq!("yagura".parse::<Rule>().unwrap(), Rule::Yagura);
        assert_eq!("mantamaria".parse::<Stage>().unwrap(), Stage::Mantamaria);
        assert!("splat".parse::<Rule>().is_err());
    }

    #[test]
    fn test_serde_names_match_wire_keys() {
        let map = sample();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"area":{"amabi":3,"zatou":4},"hoko":{"amabi":5}}"#);
        let back: RuleStageMap<u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
