//! The policy environment handed to assembly, and the read-only trees that
//! describe the caller's request.

use chrono::NaiveDate;
use policygraph_tree::{NestedTree, TreePath};
use serde::Serialize;

use crate::aggregation::AggregationSpecsTree;
use crate::error::Result;
use crate::function::{DType, FunctionsTree};
use crate::validity::FunctionPool;

/// Columns present in the caller's dataset, with their type where known.
pub type DataTree = NestedTree<Option<DType>>;

/// Requested outputs.
pub type TargetsTree = NestedTree<()>;

/// Global type table for input variables.
pub type InputTypes = NestedTree<DType>;

/// Where the type of a name can come from, in lookup order: the return type
/// of a function at that path, the input-type table, the data tree.
#[derive(Debug, Clone, Copy)]
pub struct TypeSources<'a> {
    functions: &'a FunctionsTree,
    input_types: &'a InputTypes,
    data: &'a DataTree,
}

impl<'a> TypeSources<'a> {
    pub fn new(functions: &'a FunctionsTree, input_types: &'a InputTypes, data: &'a DataTree) -> Self {
        Self {
            functions,
            input_types,
            data,
        }
    }

    pub fn lookup(&self, path: &TreePath) -> Option<DType> {
        self.functions
            .get_opt(path)
            .and_then(|f| f.return_type())
            .or_else(|| self.input_types.get_opt(path).copied())
            .or_else(|| self.data.get_opt(path).copied().flatten())
    }
}

/// Functions resolved for one date plus the author-provided aggregation specs.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEnvironment {
    policy_date: NaiveDate,
    functions: FunctionsTree,
    aggregations: AggregationSpecsTree,
    input_types: InputTypes,
}

impl PolicyEnvironment {
    /// Select the active version of every pooled function on `policy_date`.
    pub fn resolve(
        pool: &FunctionPool,
        policy_date: NaiveDate,
        aggregations: AggregationSpecsTree,
        input_types: InputTypes,
    ) -> Result<Self> {
        let functions = pool.resolve_at(policy_date)?;
        Ok(Self::from_resolved(
            policy_date,
            functions,
            aggregations,
            input_types,
        ))
    }

    /// Wrap an already resolved tree; untyped parameters get inferred types.
    pub fn from_resolved(
        policy_date: NaiveDate,
        functions: FunctionsTree,
        aggregations: AggregationSpecsTree,
        input_types: InputTypes,
    ) -> Self {
        let functions = infer_parameter_types(&functions, &input_types);
        Self {
            policy_date,
            functions,
            aggregations,
            input_types,
        }
    }

    pub fn policy_date(&self) -> NaiveDate {
        self.policy_date
    }

    pub fn functions(&self) -> &FunctionsTree {
        &self.functions
    }

    pub fn aggregations(&self) -> &AggregationSpecsTree {
        &self.aggregations
    }

    pub fn input_types(&self) -> &InputTypes {
        &self.input_types
    }
}

/// Fill in undeclared parameter types from the input-type table or from the
/// return type of the function the parameter refers to.
pub fn infer_parameter_types(functions: &FunctionsTree, input_types: &InputTypes) -> FunctionsTree {
    let no_data = DataTree::new();
    let types = TypeSources::new(functions, input_types, &no_data);
    functions.map(|function| {
        let mut function = function.clone();
        let namespace = function.namespace();
        for parameter in function.parameters_mut() {
            if parameter.dtype.is_none() {
                parameter.dtype = types.lookup(&parameter.name.resolve(&namespace));
            }
        }
        function
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::PolicyFunction;

    fn p(name: &str) -> TreePath {
        TreePath::from_qualified_name(name).unwrap()
    }

    #[test]
    fn parameter_types_come_from_functions_then_input_table() {
        let functions = FunctionsTree::from_leaves([
            (
                p("steuer__zve_y"),
                PolicyFunction::external("steuer__zve_y", "zve")
                    .returns(DType::Float)
                    .build()
                    .unwrap(),
            ),
            (
                p("steuer__betrag_y"),
                PolicyFunction::external("steuer__betrag_y", "betrag")
                    .param("zve_y")
                    .param("alter")
                    .typed_param("kinder", DType::Float)
                    .param("unbekannt")
                    .build()
                    .unwrap(),
            ),
        ])
        .unwrap();
        let input_types = InputTypes::from_leaves([
            (p("steuer__alter"), DType::Int),
            (p("steuer__kinder"), DType::Int),
        ])
        .unwrap();

        let env = PolicyEnvironment::from_resolved(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            functions,
            AggregationSpecsTree::new(),
            input_types,
        );
        let f = env.functions().get(&p("steuer__betrag_y")).unwrap();
        let dtypes: Vec<Option<DType>> = f.parameters().iter().map(|p| p.dtype).collect();
        // Declared types are never overwritten.
        assert_eq!(
            dtypes,
            vec![Some(DType::Float), Some(DType::Int), Some(DType::Float), None]
        );
    }

    #[test]
    fn lookup_falls_back_to_data_types() {
        let functions = FunctionsTree::new();
        let input_types = InputTypes::new();
        let data = DataTree::from_leaves([(p("lohn_m"), Some(DType::Float)), (p("hh_id"), None)])
            .unwrap();
        let types = TypeSources::new(&functions, &input_types, &data);
        assert_eq!(types.lookup(&p("lohn_m")), Some(DType::Float));
        assert_eq!(types.lookup(&p("hh_id")), None);
        assert_eq!(types.lookup(&p("missing")), None);
    }
}
