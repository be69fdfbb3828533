//! Policy declarations loaded from JSON.
//!
//! A policy module is a JSON document with three optional sections:
//!
//! ```json
//! {
//!   "functions": [
//!     { "name": "steuer__betrag_y", "symbol": "steuer_betrag",
//!       "parameters": ["zve_y", { "name": "alter", "dtype": "int" }],
//!       "start_date": "2010-01-01", "returns": "float" }
//!   ],
//!   "aggregations": {
//!     "kindergeld__anzahl_ansprueche": { "kind": "p_id", "method": "count",
//!                                        "p_id_to_aggregate_by": "p_id_empfaenger" }
//!   },
//!   "input_types": { "alter": "int" }
//! }
//! ```
//!
//! Several modules are merged into one [`PolicyCatalog`], which resolves to a
//! [`PolicyEnvironment`] for any policy date.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use policygraph_tree::TreePath;
use serde::Deserialize;
use tracing::debug;

use crate::aggregation::{AggregationMethod, AggregationSpec, AggregationSpecsTree};
use crate::environment::{DataTree, InputTypes, PolicyEnvironment, TargetsTree};
use crate::error::Result;
use crate::function::{DType, PolicyFunction};
use crate::validity::FunctionPool;

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyModule {
    pub functions: Vec<FunctionDecl>,
    /// Keyed by the qualified name of the aggregation target.
    pub aggregations: BTreeMap<String, AggregationDecl>,
    /// Keyed by qualified input name.
    pub input_types: BTreeMap<String, DType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDecl {
    pub name: String,
    /// Implementation symbol; defaults to `name`.
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParamDecl>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub returns: Option<DType>,
    #[serde(default)]
    pub rounding_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamDecl {
    Name(String),
    Typed { name: String, dtype: DType },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationDecl {
    Group {
        method: AggregationMethod,
        #[serde(default)]
        source: Option<String>,
    },
    PId {
        method: AggregationMethod,
        #[serde(default)]
        source: Option<String>,
        p_id_to_aggregate_by: String,
    },
}

impl FunctionDecl {
    pub fn into_function(self) -> Result<PolicyFunction> {
        let symbol = self.symbol.unwrap_or_else(|| self.name.clone());
        let mut builder = PolicyFunction::external(self.name, symbol);
        for parameter in self.parameters {
            builder = match parameter {
                ParamDecl::Name(name) => builder.param(name),
                ParamDecl::Typed { name, dtype } => builder.typed_param(name, dtype),
            };
        }
        if let Some(start) = self.start_date {
            builder = builder.valid_from(start);
        }
        if let Some(end) = self.end_date {
            builder = builder.valid_until(end);
        }
        if let Some(dtype) = self.returns {
            builder = builder.returns(dtype);
        }
        if let Some(key) = self.rounding_key {
            builder = builder.rounding_key(key);
        }
        builder.build()
    }
}

impl AggregationDecl {
    pub fn into_spec(self, target: &TreePath) -> Result<AggregationSpec> {
        match self {
            AggregationDecl::Group { method, source } => {
                AggregationSpec::by_group(target, method, source.as_deref())
            }
            AggregationDecl::PId {
                method,
                source,
                p_id_to_aggregate_by,
            } => AggregationSpec::by_p_id(target, method, source.as_deref(), &p_id_to_aggregate_by),
        }
    }
}

pub fn parse_module(json: &str) -> anyhow::Result<PolicyModule> {
    serde_json::from_str(json).context("invalid policy module")
}

pub fn load_module(path: &Path) -> anyhow::Result<PolicyModule> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read policy module {}", path.display()))?;
    parse_module(&text).with_context(|| format!("in {}", path.display()))
}

// ============================================================================
// Catalog
// ============================================================================

/// Every declared function version, aggregation spec and input type.
#[derive(Debug, Clone, Default)]
pub struct PolicyCatalog {
    pool: FunctionPool,
    aggregations: AggregationSpecsTree,
    input_types: InputTypes,
}

impl PolicyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge the modules at `paths`, in order.
    pub fn load<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> anyhow::Result<Self> {
        let mut catalog = Self::new();
        for path in paths {
            let path = path.as_ref();
            let module = load_module(path)?;
            catalog
                .add_module(module)
                .with_context(|| format!("in {}", path.display()))?;
        }
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let mut catalog = Self::new();
        catalog.add_module(parse_module(json)?)?;
        Ok(catalog)
    }

    /// Aggregation targets and input types may be declared only once. A module
    /// that fails leaves the catalog unchanged.
    pub fn add_module(&mut self, module: PolicyModule) -> Result<()> {
        let mut staged = self.clone();
        staged.apply_module(module)?;
        *self = staged;
        Ok(())
    }

    fn apply_module(&mut self, module: PolicyModule) -> Result<()> {
        let PolicyModule {
            functions,
            aggregations,
            input_types,
        } = module;
        debug!(
            functions = functions.len(),
            aggregations = aggregations.len(),
            input_types = input_types.len(),
            "adding policy module"
        );
        for decl in functions {
            self.add_function(decl.into_function()?)?;
        }
        for (name, decl) in aggregations {
            let target = TreePath::from_qualified_name(&name)?;
            let spec = decl.into_spec(&target)?;
            self.aggregations.try_insert(&target, spec)?;
        }
        for (name, dtype) in input_types {
            self.input_types
                .try_insert(&TreePath::from_qualified_name(&name)?, dtype)?;
        }
        Ok(())
    }

    pub fn add_function(&mut self, function: PolicyFunction) -> Result<()> {
        self.pool.insert(function)
    }

    pub fn pool(&self) -> &FunctionPool {
        &self.pool
    }

    pub fn aggregations(&self) -> &AggregationSpecsTree {
        &self.aggregations
    }

    pub fn input_types(&self) -> &InputTypes {
        &self.input_types
    }

    pub fn environment_at(&self, policy_date: NaiveDate) -> Result<PolicyEnvironment> {
        PolicyEnvironment::resolve(
            &self.pool,
            policy_date,
            self.aggregations.clone(),
            self.input_types.clone(),
        )
    }
}

// ============================================================================
// Request helpers
// ============================================================================

pub fn targets_from_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Result<TargetsTree> {
    let mut targets = TargetsTree::new();
    for name in names {
        targets.insert(&TreePath::from_qualified_name(name.as_ref())?, ())?;
    }
    Ok(targets)
}

/// Data columns of unknown type.
pub fn data_from_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Result<DataTree> {
    data_from_typed(names.into_iter().map(|name| (name, None)))
}

pub fn data_from_typed<S: AsRef<str>>(
    columns: impl IntoIterator<Item = (S, Option<DType>)>,
) -> Result<DataTree> {
    let mut data = DataTree::new();
    for (name, dtype) in columns {
        data.try_insert(&TreePath::from_qualified_name(name.as_ref())?, dtype)?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::function::FunctionBody;
    use std::io::Write;

    const MODULE: &str = r#"{
        "functions": [
            { "name": "steuer__rate", "symbol": "rate_alt", "end_date": "2009-12-31", "returns": "float" },
            { "name": "steuer__rate", "symbol": "rate_neu", "start_date": "2010-01-01", "returns": "float" },
            { "name": "steuer__betrag_y",
              "parameters": ["rate", "zve_y", { "name": "alter", "dtype": "int" }],
              "rounding_key": "steuer" }
        ],
        "aggregations": {
            "kindergeld__anzahl": { "kind": "p_id", "method": "count", "p_id_to_aggregate_by": "p_id_empfaenger" },
            "steuer__zve_max_hh": { "kind": "group", "method": "max", "source": "zve_y" }
        },
        "input_types": { "steuer__zve_y": "float" }
    }"#;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn module_resolves_per_date() {
        let catalog = PolicyCatalog::from_json(MODULE).unwrap();
        assert_eq!(catalog.pool().len(), 2);
        assert_eq!(catalog.aggregations().len(), 2);

        let env = catalog.environment_at(date(2012, 3, 1)).unwrap();
        let rate = env
            .functions()
            .get(&TreePath::from_qualified_name("steuer__rate").unwrap())
            .unwrap();
        assert_eq!(
            rate.body(),
            &FunctionBody::External {
                symbol: "rate_neu".into()
            }
        );

        let betrag = env
            .functions()
            .get(&TreePath::from_qualified_name("steuer__betrag_y").unwrap())
            .unwrap();
        assert_eq!(betrag.rounding_key(), Some("steuer"));
        assert_eq!(
            betrag.body(),
            &FunctionBody::External {
                symbol: "steuer__betrag_y".into()
            }
        );
        let dtypes: Vec<Option<DType>> = betrag.parameters().iter().map(|p| p.dtype).collect();
        assert_eq!(
            dtypes,
            vec![Some(DType::Float), Some(DType::Float), Some(DType::Int)]
        );
    }

    #[test]
    fn invalid_aggregations_are_rejected() {
        let err = PolicyCatalog::from_json(
            r#"{ "aggregations": { "x_hh": { "kind": "group", "method": "count", "source": "x" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::CountWithSourceColumn { .. })
        ));

        let err = PolicyCatalog::from_json(
            r#"{ "aggregations": { "x_hh": { "kind": "group", "method": "median", "source": "x" } } }"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("median"));
    }

    #[test]
    fn failing_module_leaves_the_catalog_unchanged() {
        let mut catalog = PolicyCatalog::from_json(MODULE).unwrap();
        let module = parse_module(
            r#"{
                "functions": [
                    { "name": "rente__betrag_m" },
                    { "name": "rente__punkte" },
                    { "name": "steuer__rate", "start_date": "2005-01-01" }
                ],
                "input_types": { "rente__alter": "int" }
            }"#,
        )
        .unwrap();

        let err = catalog.add_module(module).unwrap_err();
        assert!(matches!(err, EngineError::OverlappingValidity { .. }));
        assert_eq!(catalog.pool().len(), 2);
        assert_eq!(catalog.input_types().len(), 1);

        let module = parse_module(
            r#"{
                "functions": [{ "name": "rente__betrag_m" }],
                "aggregations": {
                    "kindergeld__anzahl": { "kind": "p_id", "method": "count", "p_id_to_aggregate_by": "x" }
                }
            }"#,
        )
        .unwrap();
        let err = catalog.add_module(module).unwrap_err();
        assert!(matches!(err, EngineError::Tree(_)));
        assert_eq!(catalog.pool().len(), 2);
        assert_eq!(catalog.aggregations().len(), 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_module(r#"{ "funktionen": [] }"#).is_err());
    }

    #[test]
    fn load_merges_modules_and_names_the_failing_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("steuer.json");
        fs::write(&first, MODULE).unwrap();
        let second = dir.path().join("rente.json");
        let mut file = fs::File::create(&second).unwrap();
        writeln!(
            file,
            r#"{{ "functions": [{{ "name": "rente__betrag_m", "parameters": ["punkte"] }}] }}"#
        )
        .unwrap();

        let catalog = PolicyCatalog::load([&first, &second]).unwrap();
        assert_eq!(catalog.pool().len(), 3);

        // Loading the same module twice overlaps every version.
        let err = PolicyCatalog::load([&first, &first]).unwrap_err();
        assert!(format!("{err:#}").contains("steuer.json"));

        let missing = dir.path().join("missing.json");
        let err = PolicyCatalog::load([&missing]).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn request_helpers_build_trees() {
        let targets = targets_from_names(["steuer__betrag_y", "rente__betrag_m"]).unwrap();
        assert_eq!(targets.len(), 2);
        let data = data_from_typed([("p_id", Some(DType::Int)), ("lohn_m", None)]).unwrap();
        assert_eq!(data.len(), 2);
        assert!(data_from_names(["a__b", "a__b"]).is_err());
        assert!(targets_from_names(["bad___"]).is_err());
    }
}
