//! Qualified names and tree paths.
//!
//! A path like `["einkommensteuer", "abzuege", "betrag_y"]` has two renderings:
//!
//! - the qualified name `einkommensteuer__abzuege__betrag_y`, which is the
//!   form used inside parameter lists and declaration files, and
//! - the dotted form `einkommensteuer.abzuege.betrag_y`, used in messages.
//!
//! Only the qualified name is parsed back. For the round trip to be lossless a
//! segment may not contain the separator, may not end with `_` (otherwise
//! `a_` + `b` and `a` + `_b` would collide) and must be a plain identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TreeError;

/// Separator between segments in a qualified name.
pub const QUALIFIED_NAME_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The root namespace (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments, validating each one.
    pub fn new<I, S>(segments: I) -> Result<Self, TreeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    /// Segments coming from an existing, already validated tree.
    pub(crate) fn from_trusted(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parse `a__b__c` into `["a", "b", "c"]`.
    pub fn from_qualified_name(name: &str) -> Result<Self, TreeError> {
        if name.is_empty() {
            return Err(TreeError::EmptyPath);
        }
        Self::new(name.split(QUALIFIED_NAME_SEPARATOR))
    }

    pub fn to_qualified_name(&self) -> String {
        self.segments.join(QUALIFIED_NAME_SEPARATOR)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The unqualified leaf name.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Everything but the leaf. The namespace of a top-level name is the root.
    pub fn namespace(&self) -> TreePath {
        match self.segments.split_last() {
            Some((_, init)) => Self::from_trusted(init.to_vec()),
            None => Self::root(),
        }
    }

    /// Append one segment.
    pub fn join(&self, segment: &str) -> Result<TreePath, TreeError> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self::from_trusted(segments))
    }

    /// Append every segment of `other`.
    pub fn concat(&self, other: &TreePath) -> TreePath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self::from_trusted(segments)
    }

    /// Same namespace, different leaf.
    pub fn with_leaf(&self, leaf: &str) -> Result<TreePath, TreeError> {
        self.namespace().join(leaf)
    }

    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

/// Check that `segment` can live inside a qualified name.
pub fn validate_segment(segment: &str) -> Result<(), TreeError> {
    let invalid = |reason| TreeError::InvalidSegment {
        segment: segment.to_string(),
        reason,
    };
    if segment.is_empty() {
        return Err(invalid("segments must not be empty"));
    }
    if segment.contains(QUALIFIED_NAME_SEPARATOR) {
        return Err(invalid("segments must not contain the `__` separator"));
    }
    if segment.ends_with('_') {
        return Err(invalid("segments must not end with `_`"));
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid("segments may only contain ASCII letters, digits and `_`"));
    }
    Ok(())
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl TryFrom<String> for TreePath {
    type Error = TreeError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_qualified_name(&name)
    }
}

impl TryFrom<&str> for TreePath {
    type Error = TreeError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::from_qualified_name(name)
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.to_qualified_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_round_trip() {
        let path = TreePath::from_qualified_name("einkommensteuer__abzuege__betrag_y").unwrap();
        assert_eq!(path.segments(), &["einkommensteuer", "abzuege", "betrag_y"]);
        assert_eq!(path.to_qualified_name(), "einkommensteuer__abzuege__betrag_y");
        assert_eq!(path.to_string(), "einkommensteuer.abzuege.betrag_y");
    }

    #[test]
    fn leading_underscore_segment_survives_round_trip() {
        let path = TreePath::new(["a", "_b"]).unwrap();
        let back = TreePath::from_qualified_name(&path.to_qualified_name()).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn separator_inside_segment_is_rejected() {
        let err = TreePath::new(["a__b"]).unwrap_err();
        assert!(matches!(err, TreeError::InvalidSegment { .. }));
    }

    #[test]
    fn trailing_underscore_is_rejected() {
        assert!(TreePath::new(["a_", "b"]).is_err());
        // `a___b` is read as `a` + `_b`.
        let path = TreePath::from_qualified_name("a___b").unwrap();
        assert_eq!(path.segments(), &["a", "_b"]);
    }

    #[test]
    fn empty_qualified_name_is_rejected() {
        assert_eq!(TreePath::from_qualified_name(""), Err(TreeError::EmptyPath));
        assert!(TreePath::from_qualified_name("a____b").is_err());
    }

    #[test]
    fn namespace_and_leaf() {
        let path = TreePath::from_qualified_name("a__b__c").unwrap();
        assert_eq!(path.leaf(), Some("c"));
        assert_eq!(path.namespace().to_qualified_name(), "a__b");
        assert_eq!(path.with_leaf("d").unwrap().to_qualified_name(), "a__b__d");

        let top = TreePath::from_qualified_name("p_id").unwrap();
        assert!(top.namespace().is_empty());
    }

    #[test]
    fn string_conversions_use_qualified_name() {
        let path = TreePath::try_from("groupings__hh_id").unwrap();
        assert_eq!(String::from(path), "groupings__hh_id");
    }
}
