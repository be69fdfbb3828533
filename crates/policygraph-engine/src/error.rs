//! Error taxonomy of the engine.
//!
//! Every error is fatal for the assembly that raised it: a partially assembled
//! graph is never handed on. Where several independent violations can be
//! found in one pass (missing targets, missing inputs, cycles) they are
//! collected and reported together, one dotted name per line.

use chrono::NaiveDate;
use policygraph_tree::{TreeError, TreePath};
use thiserror::Error;

use crate::function::DType;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("no version of `{name}` is active on {date}")]
    NoActiveFunction { name: String, date: NaiveDate },

    #[error("{} versions of `{name}` are active on {date}: {}", .intervals.len(), .intervals.join(", "))]
    AmbiguousActiveFunction {
        name: String,
        date: NaiveDate,
        intervals: Vec<String>,
    },

    #[error("validity intervals {first} and {second} of `{name}` overlap")]
    OverlappingValidity {
        name: String,
        first: String,
        second: String,
    },

    #[error("validity interval of `{name}` starts on {start}, after it ends on {end}")]
    InvalidValidityInterval {
        name: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("aggregation target `{target}` must end with a grouping suffix (one of: {known})")]
    InvalidAggregationTarget { target: String, known: String },

    #[error("unsupported aggregation method `{0}`; expected one of sum, mean, min, max, any, all, count")]
    UnsupportedAggregationMethod(String),

    #[error("aggregation `{target}` counts rows and must not name a source column (got `{source_col}`)")]
    CountWithSourceColumn { target: String, source_col: String },

    #[error("aggregation `{target}` with method `{method}` needs a source column")]
    MissingSourceColumn { target: String, method: String },

    #[error("the following targets have no corresponding function:\n{}", bullet_list(.0))]
    TargetsNotInFunctionsTree(Vec<TreePath>),

    #[error("the following inputs are required but neither computed nor present in the data:\n{}", bullet_list(.0))]
    RootNodesMissing(Vec<TreePath>),

    #[error("the following functions are on or downstream of a dependency cycle:\n{}", bullet_list(.0))]
    CyclicDependency(Vec<TreePath>),

    #[error("the following paths are defined both by an authored function and by an aggregation:\n{}", bullet_list(.0))]
    FunctionPathCollision(Vec<TreePath>),

    #[error("integer overflow in `{0}` reduction")]
    IntegerOverflow(String),

    #[error("invalid naming conventions: {0}")]
    InvalidConventions(String),

    #[error("`{name}` expects {expected} argument columns, got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("column length mismatch: expected {expected} rows, got {actual}")]
    ColumnLengthMismatch { expected: usize, actual: usize },

    #[error("expected a {expected} column, got {actual:?}")]
    ColumnType { expected: &'static str, actual: DType },

    #[error("`{0}` is implemented outside the engine and cannot be evaluated here")]
    NotEvaluable(String),
}

fn bullet_list(paths: &[TreePath]) -> String {
    paths
        .iter()
        .map(|path| format!("  - {path}"))
        .collect::<Vec<_>>()
        .join("\n")
}
