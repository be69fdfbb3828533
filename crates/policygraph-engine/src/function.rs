//! Policy functions as plain data.
//!
//! A [`PolicyFunction`] describes one node of the computation graph: where it
//! lives, which names it reads, when it is valid, what it returns and what its
//! body is. Bodies of authored formulas are opaque symbols bound by the
//! evaluator; bodies the engine synthesizes (groupings, aggregations, time
//! conversions) are small operation descriptors interpreted by
//! [`crate::primitives`]. Nothing here is a closure, so every node can be
//! inspected, compared and serialized.

use std::fmt;

use chrono::NaiveDate;
use policygraph_tree::{NestedTree, TreeError, TreePath, QUALIFIED_NAME_SEPARATOR};
use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationMethod;
use crate::conventions::TimeUnit;
use crate::error::{EngineError, Result};

pub type FunctionsTree = NestedTree<PolicyFunction>;

// ============================================================================
// Types and argument references
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int,
    Float,
}

/// A parameter name as written by the author.
///
/// A plain leaf name is relative to the namespace of the function reading it;
/// a name containing the qualified-name separator is absolute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum ArgRef {
    /// A single-segment path.
    Relative(TreePath),
    Absolute(TreePath),
}

impl ArgRef {
    pub fn parse(name: &str) -> std::result::Result<Self, TreeError> {
        if name.contains(QUALIFIED_NAME_SEPARATOR) {
            Ok(ArgRef::Absolute(TreePath::from_qualified_name(name)?))
        } else {
            Ok(ArgRef::Relative(TreePath::new([name])?))
        }
    }

    /// Full path of the referenced node when read from `namespace`.
    pub fn resolve(&self, namespace: &TreePath) -> TreePath {
        match self {
            ArgRef::Absolute(path) => path.clone(),
            ArgRef::Relative(leaf) => namespace.concat(leaf),
        }
    }
}

impl fmt::Display for ArgRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgRef::Relative(path) | ArgRef::Absolute(path) => {
                write!(f, "{}", path.to_qualified_name())
            }
        }
    }
}

impl From<ArgRef> for String {
    fn from(arg: ArgRef) -> Self {
        arg.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: ArgRef,
    /// Declared, or inferred when the environment is resolved.
    pub dtype: Option<DType>,
}

// ============================================================================
// Validity
// ============================================================================

/// Inclusive `[start, end]` date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ValidityInterval {
    /// From the beginning of time until the end of time.
    pub const ALWAYS: ValidityInterval = ValidityInterval {
        start: NaiveDate::MIN,
        end: NaiveDate::MAX,
    };

    /// Missing bounds become the open extremes.
    pub fn from_bounds(
        name: &TreePath,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self> {
        let interval = ValidityInterval {
            start: start.unwrap_or(NaiveDate::MIN),
            end: end.unwrap_or(NaiveDate::MAX),
        };
        if interval.start > interval.end {
            return Err(EngineError::InvalidValidityInterval {
                name: name.to_string(),
                start: interval.start,
                end: interval.end,
            });
        }
        Ok(interval)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &ValidityInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl Default for ValidityInterval {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl fmt::Display for ValidityInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |date: NaiveDate, open: NaiveDate| {
            if date == open {
                "..".to_string()
            } else {
                date.to_string()
            }
        };
        write!(
            f,
            "[{}, {}]",
            bound(self.start, NaiveDate::MIN),
            bound(self.end, NaiveDate::MAX)
        )
    }
}

// ============================================================================
// Bodies and provenance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum GroupingAlgorithm {
    /// Arguments: person id, partner id.
    Couple,
    /// Arguments: person id, household id, age, partner id, parent id 1, parent id 2.
    Family { max_child_age: i64 },
}

/// What a node computes. Operands are the function's parameters, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FunctionBody {
    /// Formula bound by the evaluator under `symbol`.
    External { symbol: String },
    Grouping(GroupingAlgorithm),
    /// Operands: `[source], group_id` (no source for `count`).
    AggregateByGroup { method: AggregationMethod },
    /// Operands: `[source], p_id_to_aggregate_by, p_id_to_store_by`.
    AggregateByPId { method: AggregationMethod },
    /// Operand: the source value, scaled by `TimeUnit::conversion_factor(from, to)`.
    TimeConversion { from: TimeUnit, to: TimeUnit },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    Authored,
    /// Grouping functions shipped with the engine.
    Builtin,
    /// Synthesized to satisfy the graph; `from` is for diagnostics only.
    Derived { from: Vec<TreePath> },
}

// ============================================================================
// Policy functions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyFunction {
    path: TreePath,
    parameters: Vec<Parameter>,
    validity: ValidityInterval,
    return_type: Option<DType>,
    rounding_key: Option<String>,
    body: FunctionBody,
    origin: Origin,
}

impl PolicyFunction {
    pub fn builder(qualified_name: impl Into<String>, body: FunctionBody) -> PolicyFunctionBuilder {
        PolicyFunctionBuilder {
            qualified_name: qualified_name.into(),
            parameters: Vec::new(),
            start: None,
            end: None,
            return_type: None,
            rounding_key: None,
            body,
        }
    }

    /// Authored formula whose implementation the evaluator binds by `symbol`.
    pub fn external(qualified_name: impl Into<String>, symbol: impl Into<String>) -> PolicyFunctionBuilder {
        Self::builder(
            qualified_name,
            FunctionBody::External {
                symbol: symbol.into(),
            },
        )
    }

    /// A node synthesized by the engine. Parameters are absolute and typed.
    pub(crate) fn synthesized(
        path: TreePath,
        parameters: Vec<(TreePath, Option<DType>)>,
        return_type: Option<DType>,
        body: FunctionBody,
        origin: Origin,
    ) -> Self {
        Self {
            path,
            parameters: parameters
                .into_iter()
                .map(|(path, dtype)| Parameter {
                    name: ArgRef::Absolute(path),
                    dtype,
                })
                .collect(),
            validity: ValidityInterval::ALWAYS,
            return_type,
            rounding_key: None,
            body,
            origin,
        }
    }

    pub fn path(&self) -> &TreePath {
        &self.path
    }

    pub fn leaf_name(&self) -> &str {
        self.path.leaf().unwrap_or_default()
    }

    pub fn namespace(&self) -> TreePath {
        self.path.namespace()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    /// Full paths of every parameter, in declaration order.
    pub fn dependencies(&self) -> Vec<TreePath> {
        let namespace = self.namespace();
        self.parameters
            .iter()
            .map(|p| p.name.resolve(&namespace))
            .collect()
    }

    pub fn validity(&self) -> &ValidityInterval {
        &self.validity
    }

    pub fn return_type(&self) -> Option<DType> {
        self.return_type
    }

    /// Parameter-table key for post-hoc rounding; carried, not interpreted.
    pub fn rounding_key(&self) -> Option<&str> {
        self.rounding_key.as_deref()
    }

    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.origin, Origin::Derived { .. })
    }

    /// Sources a derived function was built from.
    pub fn derived_from(&self) -> Option<&[TreePath]> {
        match &self.origin {
            Origin::Derived { from } => Some(from),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyFunctionBuilder {
    qualified_name: String,
    parameters: Vec<(String, Option<DType>)>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    return_type: Option<DType>,
    rounding_key: Option<String>,
    body: FunctionBody,
}

impl PolicyFunctionBuilder {
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.parameters.push((name.into(), None));
        self
    }

    pub fn typed_param(mut self, name: impl Into<String>, dtype: DType) -> Self {
        self.parameters.push((name.into(), Some(dtype)));
        self
    }

    pub fn valid_from(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    pub fn valid_until(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    pub fn returns(mut self, dtype: DType) -> Self {
        self.return_type = Some(dtype);
        self
    }

    pub fn rounding_key(mut self, key: impl Into<String>) -> Self {
        self.rounding_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<PolicyFunction> {
        let path = TreePath::from_qualified_name(&self.qualified_name)?;
        let validity = ValidityInterval::from_bounds(&path, self.start, self.end)?;
        let parameters = self
            .parameters
            .into_iter()
            .map(|(name, dtype)| {
                Ok(Parameter {
                    name: ArgRef::parse(&name)?,
                    dtype,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PolicyFunction {
            path,
            parameters,
            validity,
            return_type: self.return_type,
            rounding_key: self.rounding_key,
            body: self.body,
            origin: Origin::Authored,
        })
    }
}
