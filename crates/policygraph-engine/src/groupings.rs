//! Grouping-id functions.
//!
//! Groupings cluster persons from person-level relational columns (partner and
//! parent links). Clustering is union-find over row indices; ids are handed
//! out densely from 0 in order of each group's first row, so the output is
//! deterministic for a given input order and the partition it describes does
//! not depend on that order.
//!
//! Links are permissive: a negative id means "no link" and an id that matches
//! no person is ignored. Neither is an error.

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::conventions::Vocabulary;
use crate::error::{EngineError, Result};
use crate::function::{DType, FunctionBody, FunctionsTree, GroupingAlgorithm, Origin, PolicyFunction};

// ============================================================================
// Union-find
// ============================================================================

#[derive(Debug)]
struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Dense labels in order of first appearance.
    fn labels(mut self) -> Vec<i64> {
        let mut ids: AHashMap<usize, i64> = AHashMap::new();
        (0..self.parent.len())
            .map(|row| {
                let root = self.find(row);
                let next = ids.len() as i64;
                *ids.entry(root).or_insert(next)
            })
            .collect()
    }
}

/// Row of every person id. Duplicate ids keep their first row.
fn row_index(p_id: &[i64]) -> AHashMap<i64, usize> {
    let mut index = AHashMap::with_capacity(p_id.len());
    for (row, &id) in p_id.iter().enumerate() {
        index.entry(id).or_insert(row);
    }
    index
}

fn lookup(index: &AHashMap<i64, usize>, id: i64) -> Option<usize> {
    if id < 0 {
        return None;
    }
    index.get(&id).copied()
}

fn check_lengths(expected: usize, columns: &[&[i64]]) -> Result<()> {
    match columns.iter().find(|c| c.len() != expected) {
        Some(column) => Err(EngineError::ColumnLengthMismatch {
            expected,
            actual: column.len(),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Kernels
// ============================================================================

/// Each person shares a group with their partner; everyone else is alone.
pub fn couple_group_ids(p_id: &[i64], partner_id: &[i64]) -> Result<Vec<i64>> {
    check_lengths(p_id.len(), &[partner_id])?;
    let index = row_index(p_id);
    let mut sets = DisjointSets::new(p_id.len());
    for (row, &partner) in partner_id.iter().enumerate() {
        if let Some(other) = lookup(&index, partner) {
            sets.union(row, other);
        }
    }
    Ok(sets.labels())
}

/// Relational columns read by [`family_group_ids`], aligned with `p_id`.
#[derive(Debug, Clone, Copy)]
pub struct FamilyColumns<'a> {
    pub p_id: &'a [i64],
    pub hh_id: &'a [i64],
    pub age: &'a [i64],
    pub partner_id: &'a [i64],
    pub parent_id_1: &'a [i64],
    pub parent_id_2: &'a [i64],
}

/// Partners plus their dependent children.
///
/// A child joins a parent's group when both live in the same household, the
/// child is younger than `max_child_age` and the child has no children of
/// their own.
pub fn family_group_ids(columns: FamilyColumns<'_>, max_child_age: i64) -> Result<Vec<i64>> {
    let FamilyColumns {
        p_id,
        hh_id,
        age,
        partner_id,
        parent_id_1,
        parent_id_2,
    } = columns;
    check_lengths(
        p_id.len(),
        &[hh_id, age, partner_id, parent_id_1, parent_id_2],
    )?;

    let index = row_index(p_id);
    let parents: AHashSet<i64> = parent_id_1
        .iter()
        .chain(parent_id_2)
        .copied()
        .filter(|&id| lookup(&index, id).is_some())
        .collect();

    let mut sets = DisjointSets::new(p_id.len());
    for row in 0..p_id.len() {
        if let Some(partner) = lookup(&index, partner_id[row]) {
            sets.union(row, partner);
        }

        let dependent = age[row] < max_child_age && !parents.contains(&p_id[row]);
        if !dependent {
            continue;
        }
        for parent_ref in [parent_id_1[row], parent_id_2[row]] {
            if let Some(parent) = lookup(&index, parent_ref) {
                if hh_id[parent] == hh_id[row] {
                    sets.union(row, parent);
                }
            }
        }
    }
    Ok(sets.labels())
}

// ============================================================================
// Builtin grouping functions
// ============================================================================

/// Grouping-id functions for every configured suffix that has an algorithm.
///
/// `ehe` is the couple grouping and `fg` the family grouping; other suffixes
/// (`hh`, `bg`, ...) are expected as data columns or authored functions.
pub fn grouping_functions(vocab: &Vocabulary) -> Result<FunctionsTree> {
    let mut out = FunctionsTree::new();

    if vocab.has_grouping("ehe") {
        let path = vocab.group_id_path("ehe")?;
        let function = PolicyFunction::synthesized(
            path.clone(),
            vec![
                (vocab.person_id().clone(), Some(DType::Int)),
                (vocab.partner_id().clone(), Some(DType::Int)),
            ],
            Some(DType::Int),
            FunctionBody::Grouping(GroupingAlgorithm::Couple),
            Origin::Builtin,
        );
        out.insert(&path, function)?;
    }

    if vocab.has_grouping("fg") {
        let path = vocab.group_id_path("fg")?;
        let [parent_1, parent_2] = vocab.parent_ids();
        let function = PolicyFunction::synthesized(
            path.clone(),
            [
                vocab.person_id(),
                vocab.household_id(),
                vocab.age(),
                vocab.partner_id(),
                parent_1,
                parent_2,
            ]
            .into_iter()
            .map(|p| (p.clone(), Some(DType::Int)))
            .collect(),
            Some(DType::Int),
            FunctionBody::Grouping(GroupingAlgorithm::Family {
                max_child_age: vocab.family_child_max_age(),
            }),
            Origin::Builtin,
        );
        out.insert(&path, function)?;
    }

    debug!(count = out.len(), "builtin grouping functions");
    Ok(out)
}
