//! Date-based selection among the versions of a policy function.
//!
//! Every authored name may carry several versions, each valid over its own
//! inclusive date interval. The [`FunctionPool`] keeps all of them and rejects
//! overlapping intervals when a version is added, so at most one version is
//! active on any date. [`FunctionPool::resolve_at`] picks that version for
//! every name; names with no active version are left out.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use policygraph_tree::TreePath;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::function::{FunctionsTree, PolicyFunction};

/// The single version of `name` whose interval contains `date`.
pub fn resolve_active<'a>(
    name: &TreePath,
    candidates: &'a [PolicyFunction],
    date: NaiveDate,
) -> Result<&'a PolicyFunction> {
    let active: Vec<&PolicyFunction> = candidates
        .iter()
        .filter(|f| f.validity().contains(date))
        .collect();
    match active.as_slice() {
        [] => Err(EngineError::NoActiveFunction {
            name: name.to_string(),
            date,
        }),
        [single] => Ok(*single),
        several => Err(EngineError::AmbiguousActiveFunction {
            name: name.to_string(),
            date,
            intervals: several.iter().map(|f| f.validity().to_string()).collect(),
        }),
    }
}

/// All versions of all authored functions, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct FunctionPool {
    versions: BTreeMap<TreePath, Vec<PolicyFunction>>,
}

impl FunctionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version; its interval must not overlap any version already held.
    pub fn insert(&mut self, function: PolicyFunction) -> Result<()> {
        let versions = self.versions.entry(function.path().clone()).or_default();
        if let Some(clash) = versions
            .iter()
            .find(|v| v.validity().overlaps(function.validity()))
        {
            return Err(EngineError::OverlappingValidity {
                name: function.path().to_string(),
                first: clash.validity().to_string(),
                second: function.validity().to_string(),
            });
        }
        versions.push(function);
        versions.sort_by_key(|v| v.validity().start);
        Ok(())
    }

    /// Add several versions at once. On the first overlap the pool is left as
    /// it was before the call.
    pub fn try_extend<I: IntoIterator<Item = PolicyFunction>>(&mut self, functions: I) -> Result<()> {
        let mut staged = self.clone();
        for function in functions {
            staged.insert(function)?;
        }
        *self = staged;
        Ok(())
    }

    pub fn versions(&self, path: &TreePath) -> &[PolicyFunction] {
        self.versions.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &TreePath> {
        self.versions.keys()
    }

    /// The functions tree in force on `date`.
    pub fn resolve_at(&self, date: NaiveDate) -> Result<FunctionsTree> {
        let mut tree = FunctionsTree::new();
        for (path, versions) in &self.versions {
            match resolve_active(path, versions, date) {
                Ok(active) => tree.try_insert(path, active.clone())?,
                Err(EngineError::NoActiveFunction { .. }) => {
                    debug!(name = %path, %date, "no active version; name left out");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tree)
    }
}
