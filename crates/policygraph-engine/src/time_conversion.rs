//! Time-unit conversion functions.
//!
//! A name such as `lohn_y` that is needed but missing is synthesized from a
//! present variant of the same quantity (`lohn_m`, `lohn_w`, ...) by scaling
//! with the fixed factor between the units. Sources are only ever nodes that
//! already exist (functions or data columns), never other conversions, so the
//! synthesized nodes cannot form a cycle.

use std::collections::BTreeSet;

use policygraph_tree::TreePath;
use tracing::debug;

use crate::aggregation::{AggregationKind, AggregationSpecsTree};
use crate::conventions::{TimeUnit, Vocabulary};
use crate::environment::{DataTree, TargetsTree};
use crate::error::Result;
use crate::function::{DType, FunctionBody, FunctionsTree, Origin, PolicyFunction};

/// Conversion functions for every demanded, missing time-unit variant.
///
/// Demand is the requested targets, every function parameter and the source
/// of every group aggregation spec. A missing grouped name additionally
/// demands its ungrouped base, since the implicit aggregation built later
/// reads it. Each missing name is converted from the first variant present in
/// [`TimeUnit::SOURCE_PRIORITY`] order, in the same namespace and with the
/// same grouping suffix.
pub fn create_time_conversion_functions(
    functions: &FunctionsTree,
    targets: &TargetsTree,
    data: &DataTree,
    aggregation_specs: &AggregationSpecsTree,
    vocab: &Vocabulary,
) -> Result<FunctionsTree> {
    let present = |path: &TreePath| functions.contains(path) || data.contains(path);
    let group_targets: BTreeSet<TreePath> = aggregation_specs
        .flatten_with_path()
        .into_iter()
        .filter(|(_, spec)| spec.kind() == AggregationKind::Group)
        .map(|(path, _)| path)
        .collect();

    let mut demand: BTreeSet<TreePath> = targets.paths();
    for (_, function) in functions.flatten_with_path() {
        demand.extend(function.dependencies());
    }
    for (target, spec) in aggregation_specs.flatten_with_path() {
        if spec.kind() == AggregationKind::Group {
            if let Some(source) = spec.source() {
                demand.insert(source.resolve(&target.namespace()));
            }
        }
    }
    let grouped_bases: Vec<TreePath> = demand
        .iter()
        .filter(|path| !present(path) && !group_targets.contains(*path))
        .filter_map(|path| {
            let (base, _) = vocab.split_grouping_suffix(path.leaf()?)?;
            path.with_leaf(base).ok()
        })
        .collect();
    demand.extend(grouped_bases);

    let mut out = FunctionsTree::new();
    for path in demand {
        if present(&path) || group_targets.contains(&path) {
            continue;
        }
        let Some(leaf) = path.leaf() else { continue };
        let Some(timed) = vocab.parse_timed_name(leaf) else {
            continue;
        };
        let namespace = path.namespace();

        let mut source = None;
        for unit in TimeUnit::SOURCE_PRIORITY {
            if unit == timed.unit {
                continue;
            }
            let candidate = namespace.join(&timed.leaf_in(unit))?;
            if present(&candidate) {
                source = Some((candidate, unit));
                break;
            }
        }
        let Some((source, from)) = source else {
            continue;
        };

        debug!(
            target = %path,
            source = %source,
            factor = TimeUnit::conversion_factor(from, timed.unit),
            "synthesized time conversion"
        );
        let source_type = functions
            .get_opt(&source)
            .and_then(|f| f.return_type())
            .or_else(|| data.get_opt(&source).copied().flatten());
        let function = PolicyFunction::synthesized(
            path.clone(),
            vec![(source.clone(), source_type)],
            Some(DType::Float),
            FunctionBody::TimeConversion {
                from,
                to: timed.unit,
            },
            Origin::Derived { from: vec![source] },
        );
        out.insert(&path, function)?;
    }
    Ok(out)
}
