//! The computation graph handed to the evaluator.
//!
//! Nodes are functions, edges run from a function to each of its resolved
//! parameters. Building the graph
//!
//! - lets data columns replace functions at the same path,
//! - keeps only ancestors of the targets,
//! - fails if an ancestor is neither a function nor a data column,
//! - groups the nodes into topological levels (Kahn's algorithm); every node's
//!   function dependencies sit on earlier levels.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use policygraph_tree::TreePath;
use serde::Serialize;
use tracing::{debug, warn};

use crate::assembly::{assemble_functions, validate_targets};
use crate::conventions::Vocabulary;
use crate::environment::{DataTree, PolicyEnvironment, TargetsTree};
use crate::error::{EngineError, Result};
use crate::function::{FunctionsTree, PolicyFunction};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub function: PolicyFunction,
    /// Resolved parameter paths, in parameter order.
    pub dependencies: Vec<TreePath>,
    pub level: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputationGraph {
    /// In level order, sorted by path within a level.
    nodes: IndexMap<TreePath, GraphNode>,
    levels: Vec<Vec<TreePath>>,
    /// Data columns the nodes read.
    inputs: Vec<TreePath>,
    targets: Vec<TreePath>,
}

impl ComputationGraph {
    pub fn build(functions: &FunctionsTree, targets: &TargetsTree, data: &DataTree) -> Result<Self> {
        validate_targets(functions, targets)?;

        let mut reachable: BTreeMap<TreePath, &PolicyFunction> = BTreeMap::new();
        let mut inputs: BTreeSet<TreePath> = BTreeSet::new();
        let mut missing: BTreeSet<TreePath> = BTreeSet::new();
        let mut stack: Vec<TreePath> = targets.paths().into_iter().collect();

        while let Some(path) = stack.pop() {
            if reachable.contains_key(&path) || inputs.contains(&path) || missing.contains(&path) {
                continue;
            }
            if data.contains(&path) {
                if functions.contains(&path) {
                    warn!(name = %path, "data column overrides function");
                }
                inputs.insert(path);
                continue;
            }
            match functions.get_opt(&path) {
                Some(function) => {
                    stack.extend(function.dependencies());
                    reachable.insert(path, function);
                }
                None => {
                    missing.insert(path);
                }
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::RootNodesMissing(missing.into_iter().collect()));
        }

        let dependencies: BTreeMap<&TreePath, Vec<TreePath>> = reachable
            .iter()
            .map(|(path, function)| (path, function.dependencies()))
            .collect();
        let levels = topological_levels(&dependencies)?;

        let mut nodes = IndexMap::with_capacity(reachable.len());
        for (level, paths) in levels.iter().enumerate() {
            for path in paths {
                let (Some(function), Some(deps)) = (reachable.get(path), dependencies.get(path)) else {
                    continue;
                };
                nodes.insert(
                    path.clone(),
                    GraphNode {
                        function: (*function).clone(),
                        dependencies: deps.clone(),
                        level,
                    },
                );
            }
        }

        debug!(
            nodes = nodes.len(),
            levels = levels.len(),
            inputs = inputs.len(),
            pruned = functions.len().saturating_sub(nodes.len()),
            "built computation graph"
        );
        Ok(Self {
            nodes,
            levels,
            inputs: inputs.into_iter().collect(),
            targets: targets.paths().into_iter().collect(),
        })
    }

    pub fn get(&self, path: &TreePath) -> Option<&GraphNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &TreePath) -> bool {
        self.nodes.contains_key(path)
    }

    /// Nodes in evaluation order.
    pub fn nodes(&self) -> impl Iterator<Item = (&TreePath, &GraphNode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn levels(&self) -> &[Vec<TreePath>] {
        &self.levels
    }

    pub fn inputs(&self) -> &[TreePath] {
        &self.inputs
    }

    pub fn targets(&self) -> &[TreePath] {
        &self.targets
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Assemble the functions tree for `environment` and build its graph.
pub fn build_computation_graph(
    environment: &PolicyEnvironment,
    targets: &TargetsTree,
    data: &DataTree,
    vocab: &Vocabulary,
) -> Result<ComputationGraph> {
    let functions = assemble_functions(environment, targets, data, vocab)?;
    ComputationGraph::build(&functions, targets, data)
}

/// Kahn's algorithm with level tracking. Edges to non-nodes (inputs) are
/// ignored.
fn topological_levels(dependencies: &BTreeMap<&TreePath, Vec<TreePath>>) -> Result<Vec<Vec<TreePath>>> {
    let mut in_degree: IndexMap<&TreePath, usize> = IndexMap::new();
    let mut dependents: IndexMap<&TreePath, Vec<&TreePath>> = IndexMap::new();

    for (&node, deps) in dependencies {
        let upstream: BTreeSet<&TreePath> = deps
            .iter()
            .filter(|dep| dependencies.contains_key(dep))
            .collect();
        in_degree.insert(node, upstream.len());
        for dep in upstream {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut levels = Vec::new();
    let mut processed = 0;
    let mut current: Vec<&TreePath> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();

    while !current.is_empty() {
        current.sort();
        processed += current.len();

        let mut next = Vec::new();
        for node in &current {
            for &dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }
        }

        levels.push(current.into_iter().cloned().collect());
        current = next;
    }

    if processed != dependencies.len() {
        let cyclic: Vec<TreePath> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(node, _)| (*node).clone())
            .collect();
        return Err(EngineError::CyclicDependency(cyclic));
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::DType;

    fn p(name: &str) -> TreePath {
        TreePath::from_qualified_name(name).unwrap()
    }

    fn function(name: &str, params: &[&str]) -> (TreePath, PolicyFunction) {
        let f = params
            .iter()
            .fold(PolicyFunction::external(name, name), |b, param| b.param(*param))
            .build()
            .unwrap();
        (f.path().clone(), f)
    }

    fn targets(names: &[&str]) -> TargetsTree {
        TargetsTree::from_leaves(names.iter().map(|n| (p(n), ()))).unwrap()
    }

    fn data(names: &[&str]) -> DataTree {
        DataTree::from_leaves(names.iter().map(|n| (p(n), Some(DType::Float)))).unwrap()
    }

    #[test]
    fn levels_order_dependencies_first() {
        let functions = FunctionsTree::from_leaves([
            function("steuer__betrag", &["zve", "satz"]),
            function("steuer__zve", &["lohn"]),
            function("steuer__satz", &[]),
            function("rente__betrag", &["punkte"]),
        ])
        .unwrap();
        let graph = ComputationGraph::build(
            &functions,
            &targets(&["steuer__betrag"]),
            &data(&["steuer__lohn"]),
        )
        .unwrap();

        assert_eq!(
            graph.levels(),
            &[
                vec![p("steuer__satz"), p("steuer__zve")],
                vec![p("steuer__betrag")]
            ]
        );
        assert_eq!(graph.inputs(), &[p("steuer__lohn")]);
        // Not an ancestor of the target.
        assert!(!graph.contains(&p("rente__betrag")));
        let order: Vec<&TreePath> = graph.nodes().map(|(path, _)| path).collect();
        assert_eq!(order.last(), Some(&&p("steuer__betrag")));
        assert_eq!(graph.get(&p("steuer__betrag")).unwrap().level, 1);
    }

    #[test]
    fn data_columns_override_functions() {
        let functions = FunctionsTree::from_leaves([
            function("betrag", &["zve"]),
            function("zve", &["lohn", "abzuege"]),
        ])
        .unwrap();
        let graph =
            ComputationGraph::build(&functions, &targets(&["betrag"]), &data(&["zve"])).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.inputs(), &[p("zve")]);
    }

    #[test]
    fn missing_roots_are_batched() {
        let functions =
            FunctionsTree::from_leaves([function("a", &["x"]), function("b", &["y", "x"])])
                .unwrap();
        let err = ComputationGraph::build(&functions, &targets(&["a", "b"]), &DataTree::new())
            .unwrap_err();
        assert_eq!(err, EngineError::RootNodesMissing(vec![p("x"), p("y")]));
    }

    #[test]
    fn cycles_are_rejected() {
        let functions = FunctionsTree::from_leaves([
            function("a", &["b"]),
            function("b", &["c"]),
            function("c", &["a"]),
            function("d", &["a"]),
        ])
        .unwrap();
        let err =
            ComputationGraph::build(&functions, &targets(&["d"]), &DataTree::new()).unwrap_err();
        assert_eq!(
            err,
            EngineError::CyclicDependency(vec![p("a"), p("b"), p("c"), p("d")])
        );
    }

    #[test]
    fn serializes_to_json() {
        let functions = FunctionsTree::from_leaves([function("a", &["x"])]).unwrap();
        let graph = ComputationGraph::build(&functions, &targets(&["a"]), &data(&["x"])).unwrap();
        let json: serde_json::Value = serde_json::from_str(&graph.to_json().unwrap()).unwrap();
        assert_eq!(json["levels"][0][0], "a");
        assert_eq!(json["inputs"][0], "x");
        assert_eq!(json["nodes"]["a"]["dependencies"][0], "x");
        assert_eq!(json["nodes"]["a"]["function"]["body"]["op"], "external");
    }
}
