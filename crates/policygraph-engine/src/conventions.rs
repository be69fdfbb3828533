//! Naming conventions: the fixed vocabulary every factory agrees on.
//!
//! Two suffix families carry meaning in leaf names:
//!
//! - **time units** (`_y`, `_q`, `_m`, `_w`, `_d`): the same quantity per
//!   year, quarter, month, week or day, and
//! - **grouping suffixes** (`_hh`, `_fg`, ...): the quantity aggregated over
//!   a grouping whose id lives at `groupings__<suffix>_id`.
//!
//! A time unit may be followed by a grouping suffix (`einkommen_m_hh`).
//!
//! [`NamingConventions`] is the serde-facing configuration. It is compiled
//! once into a [`Vocabulary`], which validates it and holds the leaf-name
//! grammars as regexes; the resolver, the factories and the assembly all take
//! the `Vocabulary`, so no component derives the suffix tables on its own.

use anyhow::Context;
use policygraph_tree::path::validate_segment;
use policygraph_tree::TreePath;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// Time units
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "y")]
    Year,
    #[serde(rename = "q")]
    Quarter,
    #[serde(rename = "m")]
    Month,
    #[serde(rename = "w")]
    Week,
    #[serde(rename = "d")]
    Day,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 5] = [
        TimeUnit::Year,
        TimeUnit::Quarter,
        TimeUnit::Month,
        TimeUnit::Week,
        TimeUnit::Day,
    ];

    /// Order in which present units are preferred as conversion sources.
    pub const SOURCE_PRIORITY: [TimeUnit; 5] = [
        TimeUnit::Month,
        TimeUnit::Year,
        TimeUnit::Quarter,
        TimeUnit::Week,
        TimeUnit::Day,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Year => "y",
            TimeUnit::Quarter => "q",
            TimeUnit::Month => "m",
            TimeUnit::Week => "w",
            TimeUnit::Day => "d",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| unit.suffix() == suffix)
    }

    /// How many of this unit fit in a year.
    pub fn per_year(self) -> f64 {
        match self {
            TimeUnit::Year => 1.0,
            TimeUnit::Quarter => 4.0,
            TimeUnit::Month => 12.0,
            TimeUnit::Week => 365.25 / 7.0,
            TimeUnit::Day => 365.25,
        }
    }

    /// Factor turning a value per `from` into a value per `to`.
    pub fn conversion_factor(from: TimeUnit, to: TimeUnit) -> f64 {
        from.per_year() / to.per_year()
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConventions {
    /// Grouping suffixes without the leading underscore.
    pub grouping_suffixes: Vec<String>,
    /// Qualified name of the person identifier column.
    pub person_id: String,
    /// Namespace holding the `<suffix>_id` columns.
    pub groupings_namespace: String,
    pub relations: RelationColumns,
}

/// Person-level relational columns read by the grouping functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelationColumns {
    pub partner_id: String,
    pub parent_ids: [String; 2],
    pub age: String,
    pub household_id: String,
    /// Children at or above this age found their own family group.
    pub family_child_max_age: i64,
}

impl Default for NamingConventions {
    fn default() -> Self {
        Self {
            grouping_suffixes: ["hh", "bg", "fg", "eg", "ehe", "wthh", "sn"]
                .into_iter()
                .map(String::from)
                .collect(),
            person_id: "p_id".to_string(),
            groupings_namespace: "groupings".to_string(),
            relations: RelationColumns::default(),
        }
    }
}

impl Default for RelationColumns {
    fn default() -> Self {
        Self {
            partner_id: "familie__p_id_ehepartner".to_string(),
            parent_ids: [
                "familie__p_id_elternteil_1".to_string(),
                "familie__p_id_elternteil_2".to_string(),
            ],
            age: "alter".to_string(),
            household_id: "groupings__hh_id".to_string(),
            family_child_max_age: 25,
        }
    }
}

impl NamingConventions {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse naming conventions")
    }

    /// Validate and compile into the form the engine consumes.
    pub fn compile(&self) -> Result<Vocabulary> {
        let mut suffixes = self.grouping_suffixes.clone();
        for suffix in &suffixes {
            if suffix.is_empty()
                || !suffix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                return Err(EngineError::InvalidConventions(format!(
                    "grouping suffix `{suffix}` must be non-empty lowercase ASCII without `_`"
                )));
            }
            if TimeUnit::from_suffix(suffix).is_some() {
                return Err(EngineError::InvalidConventions(format!(
                    "grouping suffix `{suffix}` collides with a time unit"
                )));
            }
        }
        // Longest first, so `wthh` is tried before `hh`.
        suffixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let before = suffixes.len();
        suffixes.dedup();
        if suffixes.len() != before {
            return Err(EngineError::InvalidConventions(
                "grouping suffixes must be unique".to_string(),
            ));
        }

        validate_segment(&self.groupings_namespace)?;
        let relations = &self.relations;
        if relations.family_child_max_age <= 0 {
            return Err(EngineError::InvalidConventions(
                "family_child_max_age must be positive".to_string(),
            ));
        }

        let group_alternatives = suffixes
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let unit_alternatives = TimeUnit::ALL
            .iter()
            .map(|u| u.suffix())
            .collect::<Vec<_>>()
            .join("|");

        let (grouped_name, timed_name) = if suffixes.is_empty() {
            (None, compile_regex(&format!(r"^(?P<base>.+?)_(?P<unit>{unit_alternatives})$"))?)
        } else {
            (
                Some(compile_regex(&format!(
                    r"^(?P<base>.+)_(?P<group>{group_alternatives})$"
                ))?),
                compile_regex(&format!(
                    r"^(?P<base>.+?)_(?P<unit>{unit_alternatives})(?:_(?P<group>{group_alternatives}))?$"
                ))?,
            )
        };

        Ok(Vocabulary {
            grouping_suffixes: suffixes,
            person_id: TreePath::from_qualified_name(&self.person_id)?,
            groupings_namespace: TreePath::new([self.groupings_namespace.as_str()])?,
            partner_id: TreePath::from_qualified_name(&relations.partner_id)?,
            parent_ids: [
                TreePath::from_qualified_name(&relations.parent_ids[0])?,
                TreePath::from_qualified_name(&relations.parent_ids[1])?,
            ],
            age: TreePath::from_qualified_name(&relations.age)?,
            household_id: TreePath::from_qualified_name(&relations.household_id)?,
            family_child_max_age: relations.family_child_max_age,
            grouped_name,
            timed_name,
        })
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| EngineError::InvalidConventions(e.to_string()))
}

// ============================================================================
// Compiled vocabulary
// ============================================================================

/// Validated naming conventions.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    grouping_suffixes: Vec<String>,
    person_id: TreePath,
    groupings_namespace: TreePath,
    partner_id: TreePath,
    parent_ids: [TreePath; 2],
    age: TreePath,
    household_id: TreePath,
    family_child_max_age: i64,
    grouped_name: Option<Regex>,
    timed_name: Regex,
}

/// A leaf name split into `<base>_<unit>[_<grouping>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedName<'a> {
    pub base: &'a str,
    pub unit: TimeUnit,
    pub grouping: Option<&'a str>,
}

impl TimedName<'_> {
    /// The same quantity expressed in `unit`.
    pub fn leaf_in(&self, unit: TimeUnit) -> String {
        match self.grouping {
            Some(group) => format!("{}_{}_{}", self.base, unit.suffix(), group),
            None => format!("{}_{}", self.base, unit.suffix()),
        }
    }
}

impl Vocabulary {
    /// Configured grouping suffixes, longest first.
    pub fn grouping_suffixes(&self) -> &[String] {
        &self.grouping_suffixes
    }

    /// `("einkommen_m", "hh")` for `einkommen_m_hh`.
    pub fn split_grouping_suffix<'a>(&self, leaf: &'a str) -> Option<(&'a str, &'a str)> {
        let caps = self.grouped_name.as_ref()?.captures(leaf)?;
        Some((caps.name("base")?.as_str(), caps.name("group")?.as_str()))
    }

    pub fn parse_timed_name<'a>(&self, leaf: &'a str) -> Option<TimedName<'a>> {
        let caps = self.timed_name.captures(leaf)?;
        Some(TimedName {
            base: caps.name("base")?.as_str(),
            unit: TimeUnit::from_suffix(caps.name("unit")?.as_str())?,
            grouping: caps.name("group").map(|m| m.as_str()),
        })
    }

    /// `groupings__<suffix>_id`.
    pub fn group_id_path(&self, suffix: &str) -> Result<TreePath> {
        Ok(self.groupings_namespace.join(&format!("{suffix}_id"))?)
    }

    pub fn has_grouping(&self, suffix: &str) -> bool {
        self.grouping_suffixes.iter().any(|s| s == suffix)
    }

    pub fn person_id(&self) -> &TreePath {
        &self.person_id
    }

    pub fn partner_id(&self) -> &TreePath {
        &self.partner_id
    }

    pub fn parent_ids(&self) -> &[TreePath; 2] {
        &self.parent_ids
    }

    pub fn age(&self) -> &TreePath {
        &self.age
    }

    pub fn household_id(&self) -> &TreePath {
        &self.household_id
    }

    pub fn family_child_max_age(&self) -> i64 {
        self.family_child_max_age
    }
}
