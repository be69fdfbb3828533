//! Namespace trees for policy functions
//!
//! Every function, aggregation spec, requested target and data column lives at
//! a *path* in a nested namespace (`einkommensteuer.betrag_y`). This crate
//! provides the two building blocks every later stage uses:
//!
//! - [`TreePath`]: a validated path with a canonical qualified-name form
//!   (segments joined by [`QUALIFIED_NAME_SEPARATOR`]).
//! - [`NestedTree`]: a trie keyed by path segment with typed leaves and
//!   path-based get/update/merge/flatten operations.
//!
//! Segment validation happens when a path is built, never at lookup time, so a
//! `TreePath` that exists is always round-trippable through its qualified name.

pub mod path;
pub mod tree;

use thiserror::Error;

pub use path::{TreePath, QUALIFIED_NAME_SEPARATOR};
pub use tree::{merge, merge_disjoint, NestedTree, Node};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("path `{0}` not found in tree")]
    PathNotFound(String),

    #[error("invalid path segment `{segment}`: {reason}")]
    InvalidSegment {
        segment: String,
        reason: &'static str,
    },

    #[error("the empty path addresses the tree root, not a leaf")]
    EmptyPath,

    #[error("conflicting definitions at `{0}`")]
    Conflict(String),
}
