// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Weights express how likely a constraint is to contain the bug. A lower weight makes a
//! constraint cheaper to drop and thus more suspicious.

mod assign;

pub use assign::{
    assign_weights, AssignOptions, Granularity, SoftGroup, WeightedConstraint,
    WeightedConstraintSet,
};

use crate::encode::{ConstraintKind, Origin};
use fuzzy_matcher::FuzzyMatcher;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WeightClass {
    MoreLikely,
    Neutral,
    Found,
    LessLikely,
}

impl WeightClass {
    pub fn of(kind: ConstraintKind, origin: Origin) -> Self {
        match (kind, origin) {
            (ConstraintKind::AssertNegation, _) => WeightClass::Found,
            (_, Origin::BranchGuard) => WeightClass::MoreLikely,
            (_, Origin::PhiMerge | Origin::CallArgument | Origin::CallReturn) => {
                WeightClass::LessLikely
            }
            _ => WeightClass::Neutral,
        }
    }
}

impl Display for WeightClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WeightClass::MoreLikely => "MORELIKELY",
            WeightClass::Neutral => "NEUTRAL",
            WeightClass::Found => "FOUND",
            WeightClass::LessLikely => "LESSLIKELY",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weight {
    /// Never dropped by the localizer.
    Hard,
    Soft(u64),
}

impl Weight {
    pub fn soft(&self) -> Option<u64> {
        match self {
            Weight::Hard => None,
            Weight::Soft(w) => Some(*w),
        }
    }

    pub fn is_hard(&self) -> bool {
        matches!(self, Weight::Hard)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("weights need to satisfy MORELIKELY < NEUTRAL < FOUND < LESSLIKELY, got {more_likely} < {neutral} < {found} < {less_likely}")]
    Ordering {
        more_likely: u64,
        neutral: u64,
        found: u64,
        less_likely: u64,
    },
    #[error("weight `{key}` needs to be positive")]
    NonPositive { key: String },
    #[error("unknown weight `{key}`{}", did_you_mean(.suggestion))]
    UnknownKey {
        key: String,
        suggestion: Option<String>,
    },
    #[error("expected `key=value`, got `{0}`")]
    Malformed(String),
    #[error("`{value}` is not a valid value for `{key}`")]
    InvalidValue { key: String, value: String },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean `{s}`?"),
        None => String::new(),
    }
}

const KEYS: [&str; 5] = [
    "more_likely",
    "neutral",
    "found",
    "less_likely",
    "depth_penalty",
];

/// Base weight of every class plus a penalty per level of call inlining. Validated on
/// construction, so a table always satisfies `more_likely < neutral < found < less_likely`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightTable {
    more_likely: u64,
    neutral: u64,
    found: u64,
    less_likely: u64,
    depth_penalty: u64,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            more_likely: 1,
            neutral: 10,
            found: 20,
            less_likely: 10_000,
            depth_penalty: 0,
        }
    }
}

impl WeightTable {
    pub fn new(
        more_likely: u64,
        neutral: u64,
        found: u64,
        less_likely: u64,
    ) -> Result<Self, ConfigError> {
        let table = Self {
            more_likely,
            neutral,
            found,
            less_likely,
            depth_penalty: 0,
        };
        table.validate()?;
        Ok(table)
    }

    /// Added once per call level that a constraint was inlined into.
    pub fn with_depth_penalty(mut self, penalty: u64) -> Self {
        self.depth_penalty = penalty;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("more_likely", self.more_likely),
            ("neutral", self.neutral),
            ("found", self.found),
            ("less_likely", self.less_likely),
        ];
        if let Some((key, _)) = named.iter().find(|(_, w)| *w == 0) {
            return Err(ConfigError::NonPositive {
                key: key.to_string(),
            });
        }
        let ordered = named.windows(2).all(|w| w[0].1 < w[1].1);
        if !ordered {
            return Err(ConfigError::Ordering {
                more_likely: self.more_likely,
                neutral: self.neutral,
                found: self.found,
                less_likely: self.less_likely,
            });
        }
        Ok(())
    }

    pub fn weight(&self, class: WeightClass) -> u64 {
        match class {
            WeightClass::MoreLikely => self.more_likely,
            WeightClass::Neutral => self.neutral,
            WeightClass::Found => self.found,
            WeightClass::LessLikely => self.less_likely,
        }
    }

    pub fn depth_penalty(&self) -> u64 {
        self.depth_penalty
    }

    /// Weight of a soft constraint of `class` that was inlined `call_depth` levels deep.
    pub fn soft_weight(&self, class: WeightClass, call_depth: u32) -> u64 {
        self.weight(class)
            .saturating_add(self.depth_penalty.saturating_mul(call_depth as u64))
    }
}

impl Display for WeightTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "more_likely={},neutral={},found={},less_likely={},depth_penalty={}",
            self.more_likely, self.neutral, self.found, self.less_likely, self.depth_penalty
        )
    }
}

fn suggest_key(typed: &str) -> Option<String> {
    let matcher = fuzzy_matcher::skim::SkimMatcherV2::default();
    KEYS.iter()
        .flat_map(|key| matcher.fuzzy_match(key, typed).map(|s| (*key, s)))
        .max_by_key(|(_, s)| *s)
        .map(|(key, _)| key.to_string())
}

/// Parses a comma separated list of `key=value` pairs. Keys that are not mentioned keep their
/// default value.
impl FromStr for WeightTable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = WeightTable::default();
        for item in s.split(',').map(|i| i.trim()).filter(|i| !i.is_empty()) {
            let Some((key, value)) = item.split_once('=') else {
                return Err(ConfigError::Malformed(item.to_string()));
            };
            let (key, value) = (key.trim(), value.trim());
            let parsed = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })?;
            match key {
                "more_likely" => table.more_likely = parsed,
                "neutral" => table.neutral = parsed,
                "found" => table.found = parsed,
                "less_likely" => table.less_likely = parsed,
                "depth_penalty" => table.depth_penalty = parsed,
                other => {
                    return Err(ConfigError::UnknownKey {
                        key: other.to_string(),
                        suggestion: suggest_key(other),
                    })
                }
            }
        }
        table.validate()?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_ordered() {
        let table = WeightTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(table, WeightTable::new(1, 10, 20, 10_000).unwrap());
        assert_eq!(table.weight(WeightClass::Found), 20);
    }

    #[test]
    fn rejects_misordered_weights() {
        assert!(matches!(
            WeightTable::new(10, 10, 20, 30),
            Err(ConfigError::Ordering { .. })
        ));
        assert!(matches!(
            WeightTable::new(1, 10, 40, 30),
            Err(ConfigError::Ordering { .. })
        ));
        assert_eq!(
            WeightTable::new(0, 10, 20, 30),
            Err(ConfigError::NonPositive {
                key: "more_likely".to_string()
            })
        );
    }

    #[test]
    fn parse_table() {
        let table: WeightTable = "neutral=5, less_likely=100,depth_penalty=2".parse().unwrap();
        assert_eq!(table.weight(WeightClass::Neutral), 5);
        assert_eq!(table.weight(WeightClass::LessLikely), 100);
        assert_eq!(table.soft_weight(WeightClass::Neutral, 3), 11);
        assert_eq!(table.to_string().parse::<WeightTable>().unwrap(), table);
        assert_eq!("".parse::<WeightTable>().unwrap(), WeightTable::default());

        assert!(matches!(
            "neutral=30".parse::<WeightTable>(),
            Err(ConfigError::Ordering { .. })
        ));
        assert!(matches!(
            "neutral".parse::<WeightTable>(),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            "found=x".parse::<WeightTable>(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn suggest_similar_key() {
        let err = "neutrl=3".parse::<WeightTable>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownKey {
                key: "neutrl".to_string(),
                suggestion: Some("neutral".to_string()),
            }
        );
        insta::assert_snapshot!(err.to_string(), @"unknown weight `neutrl`, did you mean `neutral`?");
    }

    #[test]
    fn classes_follow_constraint_origin() {
        use ConstraintKind::*;
        assert_eq!(
            WeightClass::of(BranchCondition, Origin::BranchGuard),
            WeightClass::MoreLikely
        );
        assert_eq!(
            WeightClass::of(Assignment, Origin::Statement),
            WeightClass::Neutral
        );
        assert_eq!(
            WeightClass::of(Assignment, Origin::PhiMerge),
            WeightClass::LessLikely
        );
        assert_eq!(
            WeightClass::of(AssertNegation, Origin::Statement),
            WeightClass::Found
        );
    }
}
