//! Column kernels behind the synthesized nodes.
//!
//! The assembled graph describes synthesized nodes as data
//! ([`FunctionBody`]); this module is the small interpreter for those
//! descriptors over in-memory columns. Grouped reductions broadcast the group
//! result back to every member row. p_id reductions store, on each person's
//! row, the reduction over all rows whose foreign key points at that person.
//!
//! Reductions over no rows yield the identity of the method where one exists
//! (`sum`, `count` give 0, `any` false, `all` true) and NaN for float
//! `mean`/`min`/`max`. Integer `min`/`max` over no rows yield 0.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationMethod;
use crate::conventions::TimeUnit;
use crate::error::{EngineError, Result};
use crate::function::{DType, FunctionBody, GroupingAlgorithm, PolicyFunction};
use crate::groupings::{couple_group_ids, family_group_ids, FamilyColumns};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum Column {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            Column::Bool(_) => DType::Bool,
            Column::Int(_) => DType::Int,
            Column::Float(_) => DType::Float,
        }
    }

    pub fn as_ints(&self) -> Result<&[i64]> {
        match self {
            Column::Int(v) => Ok(v),
            other => Err(EngineError::ColumnType {
                expected: "int",
                actual: other.dtype(),
            }),
        }
    }

    fn to_floats(&self) -> Vec<f64> {
        match self {
            Column::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            Column::Int(v) => v.iter().map(|&i| i as f64).collect(),
            Column::Float(v) => v.clone(),
        }
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(EngineError::ColumnLengthMismatch { expected, actual });
    }
    Ok(())
}

// ============================================================================
// Reductions
// ============================================================================

/// Reduce `source` over `members[row]` for every output row.
fn reduce_each(
    method: AggregationMethod,
    source: Option<&Column>,
    members: &[&[usize]],
) -> Result<Column> {
    use AggregationMethod::*;

    let out = match (method, source) {
        (Count, _) => Column::Int(members.iter().map(|m| m.len() as i64).collect()),
        (_, None) => {
            return Err(EngineError::ArgumentCount {
                name: method.to_string(),
                expected: 1,
                actual: 0,
            })
        }
        (Sum, Some(Column::Bool(v))) => Column::Int(
            members
                .iter()
                .map(|m| m.iter().filter(|&&r| v[r]).count() as i64)
                .collect(),
        ),
        (Sum, Some(Column::Int(v))) => Column::Int(
            members
                .iter()
                .map(|m| {
                    m.iter()
                        .try_fold(0i64, |acc, &r| acc.checked_add(v[r]))
                        .ok_or_else(|| EngineError::IntegerOverflow(method.to_string()))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        (Sum, Some(Column::Float(v))) => Column::Float(
            members
                .iter()
                .map(|m| m.iter().map(|&r| v[r]).sum::<f64>())
                .collect(),
        ),
        (Mean, Some(column)) => {
            let v = column.to_floats();
            Column::Float(
                members
                    .iter()
                    .map(|m| {
                        if m.is_empty() {
                            f64::NAN
                        } else {
                            m.iter().map(|&r| v[r]).sum::<f64>() / m.len() as f64
                        }
                    })
                    .collect(),
            )
        }
        (Min, Some(Column::Int(v))) => Column::Int(
            members
                .iter()
                .map(|m| m.iter().map(|&r| v[r]).min().unwrap_or(0))
                .collect(),
        ),
        (Max, Some(Column::Int(v))) => Column::Int(
            members
                .iter()
                .map(|m| m.iter().map(|&r| v[r]).max().unwrap_or(0))
                .collect(),
        ),
        (Min, Some(Column::Float(v))) => Column::Float(
            members
                .iter()
                .map(|m| m.iter().map(|&r| v[r]).reduce(f64::min).unwrap_or(f64::NAN))
                .collect(),
        ),
        (Max, Some(Column::Float(v))) => Column::Float(
            members
                .iter()
                .map(|m| m.iter().map(|&r| v[r]).reduce(f64::max).unwrap_or(f64::NAN))
                .collect(),
        ),
        (Min | All, Some(Column::Bool(v))) => {
            Column::Bool(members.iter().map(|m| m.iter().all(|&r| v[r])).collect())
        }
        (Max | Any, Some(Column::Bool(v))) => {
            Column::Bool(members.iter().map(|m| m.iter().any(|&r| v[r])).collect())
        }
        (All, Some(Column::Int(v))) => {
            Column::Bool(members.iter().map(|m| m.iter().all(|&r| v[r] != 0)).collect())
        }
        (Any, Some(Column::Int(v))) => {
            Column::Bool(members.iter().map(|m| m.iter().any(|&r| v[r] != 0)).collect())
        }
        (Any | All, Some(Column::Float(_))) => {
            return Err(EngineError::ColumnType {
                expected: "bool or int",
                actual: DType::Float,
            })
        }
    };
    Ok(out)
}

/// Reduce `source` over the rows sharing each row's group id.
pub fn grouped_reduce(
    method: AggregationMethod,
    source: Option<&Column>,
    group_id: &[i64],
) -> Result<Column> {
    if let Some(source) = source {
        check_len(group_id.len(), source.len())?;
    }
    let mut groups: AHashMap<i64, Vec<usize>> = AHashMap::new();
    for (row, &id) in group_id.iter().enumerate() {
        groups.entry(id).or_default().push(row);
    }
    let members: Vec<&[usize]> = group_id
        .iter()
        .map(|id| groups.get(id).map(Vec::as_slice).unwrap_or_default())
        .collect();
    reduce_each(method, source, &members)
}

/// For every row, reduce `source` over the rows whose `p_id_to_aggregate_by`
/// equals that row's `p_id_to_store_by`. Negative keys link to nobody.
pub fn p_id_reduce(
    method: AggregationMethod,
    source: Option<&Column>,
    p_id_to_aggregate_by: &[i64],
    p_id_to_store_by: &[i64],
) -> Result<Column> {
    check_len(p_id_to_store_by.len(), p_id_to_aggregate_by.len())?;
    if let Some(source) = source {
        check_len(p_id_to_aggregate_by.len(), source.len())?;
    }
    let mut referencing: AHashMap<i64, Vec<usize>> = AHashMap::new();
    for (row, &key) in p_id_to_aggregate_by.iter().enumerate() {
        if key >= 0 {
            referencing.entry(key).or_default().push(row);
        }
    }
    let members: Vec<&[usize]> = p_id_to_store_by
        .iter()
        .map(|id| referencing.get(id).map(Vec::as_slice).unwrap_or_default())
        .collect();
    reduce_each(method, source, &members)
}

/// Scale a per-`from` quantity into a per-`to` quantity.
pub fn convert_time_unit(column: &Column, from: TimeUnit, to: TimeUnit) -> Result<Column> {
    if let Column::Bool(_) = column {
        return Err(EngineError::ColumnType {
            expected: "int or float",
            actual: DType::Bool,
        });
    }
    let factor = TimeUnit::conversion_factor(from, to);
    Ok(Column::Float(
        column.to_floats().into_iter().map(|v| v * factor).collect(),
    ))
}

// ============================================================================
// Interpreter
// ============================================================================

/// Evaluate one synthesized node over its argument columns, given in
/// parameter order.
pub fn evaluate_synthesized(function: &PolicyFunction, args: &[&Column]) -> Result<Column> {
    let expected = function.parameters().len();
    if args.len() != expected {
        return Err(EngineError::ArgumentCount {
            name: function.path().to_string(),
            expected,
            actual: args.len(),
        });
    }

    match function.body() {
        FunctionBody::External { .. } => {
            Err(EngineError::NotEvaluable(function.path().to_string()))
        }
        FunctionBody::Grouping(GroupingAlgorithm::Couple) => {
            let [p_id, partner] = int_args::<2>(function, args)?;
            Ok(Column::Int(couple_group_ids(p_id, partner)?))
        }
        FunctionBody::Grouping(GroupingAlgorithm::Family { max_child_age }) => {
            let [p_id, hh_id, age, partner_id, parent_id_1, parent_id_2] =
                int_args::<6>(function, args)?;
            let columns = FamilyColumns {
                p_id,
                hh_id,
                age,
                partner_id,
                parent_id_1,
                parent_id_2,
            };
            Ok(Column::Int(family_group_ids(columns, *max_child_age)?))
        }
        FunctionBody::AggregateByGroup { method } => match args {
            [group_id] => grouped_reduce(*method, None, group_id.as_ints()?),
            [source, group_id] => grouped_reduce(*method, Some(*source), group_id.as_ints()?),
            _ => Err(arity(function, 2, args.len())),
        },
        FunctionBody::AggregateByPId { method } => match args {
            [by, store] => p_id_reduce(*method, None, by.as_ints()?, store.as_ints()?),
            [source, by, store] => {
                p_id_reduce(*method, Some(*source), by.as_ints()?, store.as_ints()?)
            }
            _ => Err(arity(function, 3, args.len())),
        },
        FunctionBody::TimeConversion { from, to } => match args {
            [source] => convert_time_unit(source, *from, *to),
            _ => Err(arity(function, 1, args.len())),
        },
    }
}

fn arity(function: &PolicyFunction, expected: usize, actual: usize) -> EngineError {
    EngineError::ArgumentCount {
        name: function.path().to_string(),
        expected,
        actual,
    }
}

fn int_args<'a, const N: usize>(
    function: &PolicyFunction,
    args: &[&'a Column],
) -> Result<[&'a [i64]; N]> {
    let columns: [&'a Column; N] = args
        .try_into()
        .map_err(|_| arity(function, N, args.len()))?;
    let empty: &'a [i64] = &[];
    let mut out = [empty; N];
    for (slot, column) in out.iter_mut().zip(columns) {
        *slot = column.as_ints()?;
    }
    Ok(out)
}
