//! Policygraph: time-resolved policy functions assembled into a DAG
//!
//! Given a pool of time-versioned policy functions, a set of requested
//! targets and the columns of a dataset, the engine
//!
//! 1. selects the version of every function valid on the policy date,
//! 2. synthesizes the functions nobody wrote but the graph needs
//!    (grouping ids, p_id and group aggregations, time-unit conversions),
//! 3. merges everything into one namespace tree and checks that every target
//!    is provided, and
//! 4. builds the computation graph, pruned to the targets' ancestors and
//!    grouped into topological levels.
//!
//! Nothing is evaluated here except through [`primitives`], the reference
//! kernels for the operations synthesized nodes describe.
//!
//! ## Module Organization
//!
//! - `conventions`: naming conventions, time units and the compiled vocabulary
//! - `function`: policy functions as data
//! - `validity`: date-based version selection
//! - `environment`: the resolved environment and request trees
//! - `groupings`, `aggregation`, `time_conversion`: the synthesis factories
//! - `assembly`, `graph`: the pipeline and its output
//! - `declarations`: JSON policy modules

pub mod aggregation;
pub mod assembly;
pub mod conventions;
pub mod declarations;
pub mod environment;
pub mod error;
pub mod function;
pub mod graph;
pub mod groupings;
pub mod primitives;
pub mod time_conversion;
pub mod validity;

pub use aggregation::{
    build_aggregation_functions, derive_implicit_aggregation_specs, AggregationKind,
    AggregationMethod, AggregationSpec, AggregationSpecsTree,
};
pub use assembly::{assemble_functions, validate_targets};
pub use conventions::{NamingConventions, RelationColumns, TimeUnit, TimedName, Vocabulary};
pub use declarations::{
    data_from_names, data_from_typed, targets_from_names, PolicyCatalog, PolicyModule,
};
pub use environment::{DataTree, InputTypes, PolicyEnvironment, TargetsTree, TypeSources};
pub use error::{EngineError, Result};
pub use function::{
    ArgRef, DType, FunctionBody, FunctionsTree, GroupingAlgorithm, Origin, Parameter,
    PolicyFunction, PolicyFunctionBuilder, ValidityInterval,
};
pub use graph::{build_computation_graph, ComputationGraph, GraphNode};
pub use groupings::{couple_group_ids, family_group_ids, grouping_functions, FamilyColumns};
pub use primitives::{evaluate_synthesized, Column};
pub use time_conversion::create_time_conversion_functions;
pub use validity::{resolve_active, FunctionPool};

pub use policygraph_tree::{NestedTree, TreeError, TreePath};
