//! Assembly of the complete functions tree.
//!
//! The pipeline is linear and its order is load-bearing:
//!
//! 1. time-resolved functions from the [`PolicyEnvironment`]
//! 2. builtin grouping functions, where nothing else defines the path
//! 3. p_id aggregations
//! 4. time conversions
//! 5. group aggregations, explicit and implicit
//! 6. target validation
//!
//! Every synthesis stage sees the union of all earlier output, so a group
//! aggregation can reduce a time conversion, which can scale a p_id
//! aggregation.

use policygraph_tree::{merge, merge_disjoint, TreePath};
use tracing::{debug, info};

use crate::aggregation::{build_aggregation_functions, derive_implicit_aggregation_specs, AggregationKind};
use crate::conventions::Vocabulary;
use crate::environment::{DataTree, PolicyEnvironment, TargetsTree, TypeSources};
use crate::error::{EngineError, Result};
use crate::function::FunctionsTree;
use crate::groupings::grouping_functions;
use crate::time_conversion::create_time_conversion_functions;

/// Merge authored and synthesized functions into one tree and check that
/// every target is provided.
pub fn assemble_functions(
    environment: &PolicyEnvironment,
    targets: &TargetsTree,
    data: &DataTree,
    vocab: &Vocabulary,
) -> Result<FunctionsTree> {
    let mut functions = environment.functions().clone();
    let authored = functions.len();

    let builtin = grouping_functions(vocab)?
        .filter(|path, _| !functions.contains(path) && !data.contains(path));
    let groupings = builtin.len();
    functions = merge(&builtin, &functions);

    let p_id_aggregations = build_aggregation_functions(
        environment.aggregations(),
        AggregationKind::PId,
        &TypeSources::new(&functions, environment.input_types(), data),
        vocab,
    )?;
    functions = merge_stage(&functions, &p_id_aggregations)?;

    let conversions =
        create_time_conversion_functions(&functions, targets, data, environment.aggregations(), vocab)?;
    functions = merge_stage(&functions, &conversions)?;

    let group_specs = derive_implicit_aggregation_specs(
        &functions,
        targets,
        data,
        environment.aggregations(),
        vocab,
    )?;
    let group_aggregations = build_aggregation_functions(
        &group_specs,
        AggregationKind::Group,
        &TypeSources::new(&functions, environment.input_types(), data),
        vocab,
    )?;
    functions = merge_stage(&functions, &group_aggregations)?;

    info!(
        policy_date = %environment.policy_date(),
        authored,
        groupings,
        p_id_aggregations = p_id_aggregations.len(),
        time_conversions = conversions.len(),
        group_aggregations = group_aggregations.len(),
        total = functions.len(),
        "assembled functions tree"
    );

    validate_targets(&functions, targets)?;
    Ok(functions)
}

/// Add one synthesis stage to the tree. A stage never replaces an existing
/// function; every colliding path is reported at once.
fn merge_stage(functions: &FunctionsTree, stage: &FunctionsTree) -> Result<FunctionsTree> {
    let collisions: Vec<TreePath> = stage
        .paths()
        .into_iter()
        .filter(|path| functions.contains(path))
        .collect();
    if !collisions.is_empty() {
        return Err(EngineError::FunctionPathCollision(collisions));
    }
    Ok(merge_disjoint(functions, stage)?)
}

/// Every target must have a function; all missing targets are reported at once.
pub fn validate_targets(functions: &FunctionsTree, targets: &TargetsTree) -> Result<()> {
    let missing: Vec<TreePath> = targets.paths_missing_from(functions);
    if missing.is_empty() {
        return Ok(());
    }
    debug!(missing = missing.len(), "targets without functions");
    Err(EngineError::TargetsNotInFunctionsTree(missing))
}
