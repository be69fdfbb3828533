//! Aggregation specs and the functions synthesized from them.
//!
//! Two kinds of aggregation exist:
//!
//! - **by group**: reduce a source column over all rows sharing a grouping id.
//!   The grouping is read off the target's suffix (`einkommen_m_hh` is reduced
//!   over `groupings__hh_id`).
//! - **by p_id**: for each person, reduce a source column over all rows whose
//!   foreign-key column points at that person's id.
//!
//! Authors may declare specs explicitly. Group specs are also derived
//! implicitly for every requested or referenced name carrying a grouping
//! suffix that nothing else provides: `x_hh` becomes `sum(x)` over `hh_id`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use policygraph_tree::{merge, NestedTree, TreePath};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conventions::Vocabulary;
use crate::environment::{DataTree, TargetsTree, TypeSources};
use crate::error::{EngineError, Result};
use crate::function::{ArgRef, DType, FunctionBody, FunctionsTree, Origin, PolicyFunction};

pub type AggregationSpecsTree = NestedTree<AggregationSpec>;

// ============================================================================
// Methods
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum AggregationMethod {
    Sum,
    Mean,
    Min,
    Max,
    Any,
    All,
    Count,
}

impl AggregationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::Sum => "sum",
            AggregationMethod::Mean => "mean",
            AggregationMethod::Min => "min",
            AggregationMethod::Max => "max",
            AggregationMethod::Any => "any",
            AggregationMethod::All => "all",
            AggregationMethod::Count => "count",
        }
    }

    /// Return type of the aggregate given the source column's type.
    ///
    /// `count` is always int, a sum of bools is int, `any`/`all` of ints are
    /// bool and a mean is float; everything else keeps the source type.
    pub fn output_type(self, source: Option<DType>) -> Option<DType> {
        match (self, source) {
            (AggregationMethod::Count, _) => Some(DType::Int),
            (AggregationMethod::Sum, Some(DType::Bool)) => Some(DType::Int),
            (AggregationMethod::Any | AggregationMethod::All, Some(DType::Int)) => Some(DType::Bool),
            (AggregationMethod::Mean, Some(_)) => Some(DType::Float),
            (_, other) => other,
        }
    }
}

impl FromStr for AggregationMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(AggregationMethod::Sum),
            "mean" => Ok(AggregationMethod::Mean),
            "min" => Ok(AggregationMethod::Min),
            "max" => Ok(AggregationMethod::Max),
            "any" => Ok(AggregationMethod::Any),
            "all" => Ok(AggregationMethod::All),
            "count" => Ok(AggregationMethod::Count),
            other => Err(EngineError::UnsupportedAggregationMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for AggregationMethod {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Specs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Group,
    PId,
}

/// An aggregation; its target is the path it is stored at in the specs tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationSpec {
    ByGroup {
        method: AggregationMethod,
        source: Option<ArgRef>,
    },
    ByPId {
        method: AggregationMethod,
        source: Option<ArgRef>,
        p_id_to_aggregate_by: ArgRef,
    },
}

impl AggregationSpec {
    pub fn by_group(
        target: &TreePath,
        method: AggregationMethod,
        source: Option<&str>,
    ) -> Result<Self> {
        let spec = AggregationSpec::ByGroup {
            method,
            source: source.map(ArgRef::parse).transpose()?,
        };
        spec.validate(target)?;
        Ok(spec)
    }

    pub fn by_p_id(
        target: &TreePath,
        method: AggregationMethod,
        source: Option<&str>,
        p_id_to_aggregate_by: &str,
    ) -> Result<Self> {
        let spec = AggregationSpec::ByPId {
            method,
            source: source.map(ArgRef::parse).transpose()?,
            p_id_to_aggregate_by: ArgRef::parse(p_id_to_aggregate_by)?,
        };
        spec.validate(target)?;
        Ok(spec)
    }

    pub fn kind(&self) -> AggregationKind {
        match self {
            AggregationSpec::ByGroup { .. } => AggregationKind::Group,
            AggregationSpec::ByPId { .. } => AggregationKind::PId,
        }
    }

    pub fn method(&self) -> AggregationMethod {
        match self {
            AggregationSpec::ByGroup { method, .. } | AggregationSpec::ByPId { method, .. } => {
                *method
            }
        }
    }

    pub fn source(&self) -> Option<&ArgRef> {
        match self {
            AggregationSpec::ByGroup { source, .. } | AggregationSpec::ByPId { source, .. } => {
                source.as_ref()
            }
        }
    }

    /// `count` takes no source column; every other method needs one.
    pub fn validate(&self, target: &TreePath) -> Result<()> {
        match (self.method(), self.source()) {
            (AggregationMethod::Count, Some(source)) => Err(EngineError::CountWithSourceColumn {
                target: target.to_string(),
                source_col: source.to_string(),
            }),
            (method, None) if method != AggregationMethod::Count => {
                Err(EngineError::MissingSourceColumn {
                    target: target.to_string(),
                    method: method.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Implicit specs
// ============================================================================

/// Derive `sum` specs for grouped names nothing provides, then lay the
/// author-provided specs over them.
///
/// Candidates are the requested targets and the resolved parameters of every
/// function in `functions`. A candidate yields a spec when its leaf ends in a
/// grouping suffix and no function, data column or provided spec sits at its
/// path. Running this again after merging the synthesized functions yields no
/// new specs.
pub fn derive_implicit_aggregation_specs(
    functions: &FunctionsTree,
    targets: &TargetsTree,
    data: &DataTree,
    provided: &AggregationSpecsTree,
    vocab: &Vocabulary,
) -> Result<AggregationSpecsTree> {
    let mut candidates: BTreeSet<TreePath> = targets.paths();
    for (_, function) in functions.flatten_with_path() {
        candidates.extend(function.dependencies());
    }

    let mut implicit = AggregationSpecsTree::new();
    for path in candidates {
        if functions.contains(&path) || data.contains(&path) || provided.contains(&path) {
            continue;
        }
        let Some((base, _)) = path.leaf().and_then(|leaf| vocab.split_grouping_suffix(leaf))
        else {
            continue;
        };
        debug!(target = %path, source = base, "derived implicit group aggregation");
        let spec = AggregationSpec::by_group(&path, AggregationMethod::Sum, Some(base))?;
        implicit.insert(&path, spec)?;
    }

    Ok(merge(&implicit, provided))
}

// ============================================================================
// Synthesis
// ============================================================================

/// Build one function per spec of the requested `kind`, at the spec's path.
pub fn build_aggregation_functions(
    specs: &AggregationSpecsTree,
    kind: AggregationKind,
    types: &TypeSources<'_>,
    vocab: &Vocabulary,
) -> Result<FunctionsTree> {
    let mut out = FunctionsTree::new();
    for (target, spec) in specs.flatten_with_path() {
        if spec.kind() != kind {
            continue;
        }
        let function = aggregation_function(&target, spec, types, vocab)?;
        out.insert(&target, function)?;
    }
    Ok(out)
}

fn aggregation_function(
    target: &TreePath,
    spec: &AggregationSpec,
    types: &TypeSources<'_>,
    vocab: &Vocabulary,
) -> Result<PolicyFunction> {
    spec.validate(target)?;
    let namespace = target.namespace();
    let method = spec.method();

    let source = spec.source().map(|s| s.resolve(&namespace));
    let source_type = source.as_ref().and_then(|s| types.lookup(s));
    if let (Some(source), None) = (&source, source_type) {
        debug!(target = %target, source = %source, "aggregation source has no known type");
    }

    let (body, keys) = match spec {
        AggregationSpec::ByGroup { .. } => {
            let suffix = target
                .leaf()
                .and_then(|leaf| vocab.split_grouping_suffix(leaf))
                .map(|(_, suffix)| suffix)
                .ok_or_else(|| EngineError::InvalidAggregationTarget {
                    target: target.to_string(),
                    known: vocab.grouping_suffixes().join(", "),
                })?;
            (
                FunctionBody::AggregateByGroup { method },
                vec![vocab.group_id_path(suffix)?],
            )
        }
        AggregationSpec::ByPId {
            p_id_to_aggregate_by,
            ..
        } => (
            FunctionBody::AggregateByPId { method },
            vec![
                p_id_to_aggregate_by.resolve(&namespace),
                vocab.person_id().clone(),
            ],
        ),
    };

    let mut parameters = Vec::with_capacity(keys.len() + 1);
    if let Some(source) = &source {
        parameters.push((source.clone(), source_type));
    }
    parameters.extend(keys.iter().map(|key| (key.clone(), Some(DType::Int))));

    let from: Vec<TreePath> = source.into_iter().chain(keys.into_iter().take(1)).collect();
    debug!(
        target = %target,
        method = %method,
        from = ?from.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        "synthesized aggregation"
    );

    Ok(PolicyFunction::synthesized(
        target.clone(),
        parameters,
        method.output_type(source_type),
        body,
        Origin::Derived { from },
    ))
}
