//! `NestedTree`: a trie keyed by path segment with typed leaves.
//!
//! Children are kept in a `BTreeMap`, so every enumeration
//! (`flatten_with_path`, `paths`, ...) is sorted and deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};

use crate::path::TreePath;
use crate::TreeError;

#[derive(Debug, Clone, PartialEq)]
pub enum Node<T> {
    Leaf(T),
    Branch(NestedTree<T>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedTree<T> {
    children: BTreeMap<String, Node<T>>,
}

impl<T> Default for NestedTree<T> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
        }
    }
}

impl<T> NestedTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, leaf)` pairs. Later pairs overwrite earlier ones.
    pub fn from_leaves<I>(leaves: I) -> Result<Self, TreeError>
    where
        I: IntoIterator<Item = (TreePath, T)>,
    {
        let mut tree = Self::new();
        for (path, leaf) in leaves {
            tree.insert(&path, leaf)?;
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.children
            .values()
            .map(|node| match node {
                Node::Leaf(_) => 1,
                Node::Branch(sub) => sub.len(),
            })
            .sum()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Node<T>)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Leaf at `path`, or `PathNotFound`.
    pub fn get(&self, path: &TreePath) -> Result<&T, TreeError> {
        self.get_opt(path)
            .ok_or_else(|| TreeError::PathNotFound(path.to_string()))
    }

    pub fn get_opt(&self, path: &TreePath) -> Option<&T> {
        let (leaf, namespace) = path.segments().split_last()?;
        let mut current = self;
        for segment in namespace {
            match current.children.get(segment)? {
                Node::Branch(sub) => current = sub,
                Node::Leaf(_) => return None,
            }
        }
        match current.children.get(leaf)? {
            Node::Leaf(value) => Some(value),
            Node::Branch(_) => None,
        }
    }

    /// `true` if a leaf (not a namespace) lives at `path`.
    pub fn contains(&self, path: &TreePath) -> bool {
        self.get_opt(path).is_some()
    }

    /// Namespace node at `namespace`. The root namespace is the tree itself.
    pub fn subtree(&self, namespace: &TreePath) -> Option<&NestedTree<T>> {
        let mut current = self;
        for segment in namespace.segments() {
            match current.children.get(segment)? {
                Node::Branch(sub) => current = sub,
                Node::Leaf(_) => return None,
            }
        }
        Some(current)
    }

    /// Insert or overwrite the leaf at `path`, creating namespaces on the way.
    ///
    /// A leaf standing where a namespace is needed is replaced by that
    /// namespace; a namespace standing at `path` is replaced by the leaf.
    pub fn insert(&mut self, path: &TreePath, value: T) -> Result<Option<T>, TreeError> {
        let (leaf, namespace) = path.segments().split_last().ok_or(TreeError::EmptyPath)?;
        let mut current = self;
        for segment in namespace {
            let node = current
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::Branch(NestedTree::new()));
            if matches!(node, Node::Leaf(_)) {
                *node = Node::Branch(NestedTree::new());
            }
            let Node::Branch(sub) = node else {
                return Err(TreeError::Conflict(path.to_string()));
            };
            current = sub;
        }
        match current.children.insert(leaf.clone(), Node::Leaf(value)) {
            Some(Node::Leaf(previous)) => Ok(Some(previous)),
            _ => Ok(None),
        }
    }

    /// Insert a leaf that must not collide with anything already in the tree.
    pub fn try_insert(&mut self, path: &TreePath, value: T) -> Result<(), TreeError> {
        let (leaf, namespace) = path.segments().split_last().ok_or(TreeError::EmptyPath)?;
        let mut current = self;
        for (depth, segment) in namespace.iter().enumerate() {
            let node = current
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::Branch(NestedTree::new()));
            current = match node {
                Node::Branch(sub) => sub,
                Node::Leaf(_) => {
                    let prefix = TreePath::from_trusted(namespace[..=depth].to_vec());
                    return Err(TreeError::Conflict(prefix.to_string()));
                }
            };
        }
        if current.children.contains_key(leaf) {
            return Err(TreeError::Conflict(path.to_string()));
        }
        current.children.insert(leaf.clone(), Node::Leaf(value));
        Ok(())
    }

    /// Remove the leaf at `path`, pruning namespaces left empty.
    pub fn remove(&mut self, path: &TreePath) -> Option<T> {
        let (leaf, namespace) = path.segments().split_last()?;
        self.remove_at(namespace, leaf)
    }

    fn remove_at(&mut self, namespace: &[String], leaf: &str) -> Option<T> {
        match namespace.split_first() {
            None => {
                if !matches!(self.children.get(leaf)?, Node::Leaf(_)) {
                    return None;
                }
                match self.children.remove(leaf)? {
                    Node::Leaf(value) => Some(value),
                    Node::Branch(_) => None,
                }
            }
            Some((head, rest)) => {
                let Node::Branch(sub) = self.children.get_mut(head)? else {
                    return None;
                };
                let removed = sub.remove_at(rest, leaf);
                if sub.is_empty() {
                    self.children.remove(head);
                }
                removed
            }
        }
    }

    /// Every leaf with its full path, in sorted path order.
    pub fn flatten_with_path(&self) -> Vec<(TreePath, &T)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.collect_leaves(&mut prefix, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &mut Vec<String>, out: &mut Vec<(TreePath, &'a T)>) {
        for (name, node) in &self.children {
            prefix.push(name.clone());
            match node {
                Node::Leaf(value) => out.push((TreePath::from_trusted(prefix.clone()), value)),
                Node::Branch(sub) => sub.collect_leaves(prefix, out),
            }
            prefix.pop();
        }
    }

    pub fn paths(&self) -> BTreeSet<TreePath> {
        self.flatten_with_path()
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    }

    /// Leaf paths of `self` that have no leaf in `other`, sorted.
    pub fn paths_missing_from<U>(&self, other: &NestedTree<U>) -> Vec<TreePath> {
        self.flatten_with_path()
            .into_iter()
            .map(|(path, _)| path)
            .filter(|path| !other.contains(path))
            .collect()
    }

    /// Same shape, leaves mapped through `f`.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> NestedTree<U> {
        self.map_with(&f)
    }

    fn map_with<U, F: Fn(&T) -> U>(&self, f: &F) -> NestedTree<U> {
        NestedTree {
            children: self
                .children
                .iter()
                .map(|(name, node)| {
                    let mapped = match node {
                        Node::Leaf(value) => Node::Leaf(f(value)),
                        Node::Branch(sub) => Node::Branch(sub.map_with(f)),
                    };
                    (name.clone(), mapped)
                })
                .collect(),
        }
    }

    /// Keep the leaves for which `keep(path, leaf)` holds; drop empty namespaces.
    pub fn filter(&self, keep: impl Fn(&TreePath, &T) -> bool) -> NestedTree<T>
    where
        T: Clone,
    {
        let mut out = NestedTree::new();
        for (path, value) in self.flatten_with_path() {
            if keep(&path, value) {
                // Paths come from a well-formed tree and are never empty.
                let _ = out.insert(&path, value.clone());
            }
        }
        out
    }
}

impl<T: Clone> NestedTree<T> {
    /// Non-mutating insert.
    pub fn update(&self, path: &TreePath, value: T) -> Result<Self, TreeError> {
        let mut out = self.clone();
        out.insert(path, value)?;
        Ok(out)
    }
}

/// Last-write-wins merge: every leaf of `update` overwrites `base` at its path.
///
/// For structurally compatible trees (no leaf of one sitting on a namespace of
/// the other) `paths(merge(a, b)) == paths(a) ∪ paths(b)` and every path of `b`
/// maps to `b`'s leaf.
pub fn merge<T: Clone>(base: &NestedTree<T>, update: &NestedTree<T>) -> NestedTree<T> {
    let mut out = base.clone();
    for (path, value) in update.flatten_with_path() {
        // Paths come from a well-formed tree and are never empty.
        let _ = out.insert(&path, value.clone());
    }
    out
}

/// Additive merge: any colliding path is an error.
pub fn merge_disjoint<T: Clone>(
    base: &NestedTree<T>,
    other: &NestedTree<T>,
) -> Result<NestedTree<T>, TreeError> {
    let mut out = base.clone();
    for (path, value) in other.flatten_with_path() {
        out.try_insert(&path, value.clone())?;
    }
    Ok(out)
}

// ============================================================================
// Serialization
// ============================================================================

/// Serializes as nested maps; leaves appear in place of their branch.
impl<T: Serialize> Serialize for NestedTree<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.children.iter())
    }
}

impl<T: Serialize> Serialize for Node<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Leaf(value) => value.serialize(serializer),
            Node::Branch(tree) => tree.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str) -> TreePath {
        TreePath::from_qualified_name(name).unwrap()
    }

    fn tree(leaves: &[(&str, i32)]) -> NestedTree<i32> {
        NestedTree::from_leaves(leaves.iter().map(|(n, v)| (p(n), *v))).unwrap()
    }

    #[test]
    fn get_missing_path_fails() {
        let t = tree(&[("a__b", 1)]);
        assert_eq!(t.get(&p("a__b")), Ok(&1));
        assert_eq!(t.get(&p("a__c")), Err(TreeError::PathNotFound("a.c".into())));
        // A namespace is not a leaf.
        assert!(t.get(&p("a")).is_err());
    }

    #[test]
    fn update_is_pure() {
        let t = tree(&[("a__b", 1)]);
        let u = t.update(&p("a__c__d"), 2).unwrap();
        assert!(!t.contains(&p("a__c__d")));
        assert_eq!(u.get(&p("a__c__d")), Ok(&2));
        assert_eq!(u.get(&p("a__b")), Ok(&1));
    }

    #[test]
    fn merge_last_write_wins() {
        let a = tree(&[("x__a", 1), ("x__b", 2), ("y", 3)]);
        let b = tree(&[("x__b", 20), ("z__c", 30)]);
        let m = merge(&a, &b);
        assert_eq!(m.get(&p("x__a")), Ok(&1));
        assert_eq!(m.get(&p("x__b")), Ok(&20));
        assert_eq!(m.get(&p("z__c")), Ok(&30));
        assert_eq!(m.len(), 4);

        let swapped = merge(&b, &a);
        assert_eq!(swapped.get(&p("x__b")), Ok(&2));
    }

    #[test]
    fn merge_disjoint_rejects_collisions() {
        let a = tree(&[("x__a", 1)]);
        assert_eq!(
            merge_disjoint(&a, &tree(&[("x__a", 2)])),
            Err(TreeError::Conflict("x.a".into()))
        );
        assert_eq!(
            merge_disjoint(&a, &tree(&[("x__a__deep", 2)])),
            Err(TreeError::Conflict("x.a".into()))
        );
        let ok = merge_disjoint(&a, &tree(&[("x__b", 2)])).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn flatten_is_sorted_and_complete() {
        let t = tree(&[("b", 2), ("a__z", 1), ("a__c", 0)]);
        let names: Vec<String> = t
            .flatten_with_path()
            .into_iter()
            .map(|(path, _)| path.to_qualified_name())
            .collect();
        assert_eq!(names, vec!["a__c", "a__z", "b"]);
    }

    #[test]
    fn remove_prunes_empty_namespaces() {
        let mut t = tree(&[("a__b__c", 1), ("d", 2)]);
        assert_eq!(t.remove(&p("a__b__c")), Some(1));
        assert!(t.subtree(&p("a")).is_none());
        assert_eq!(t.len(), 1);
        assert_eq!(t.remove(&p("a__b__c")), None);
    }

    #[test]
    fn paths_missing_from_compares_by_path() {
        let targets = tree(&[("a__b", 0), ("c", 0)]);
        let functions = NestedTree::from_leaves([(p("a__b"), "f")]).unwrap();
        assert_eq!(targets.paths_missing_from(&functions), vec![p("c")]);
    }

    #[test]
    fn insert_into_root_path_fails() {
        let mut t: NestedTree<i32> = NestedTree::new();
        assert_eq!(t.insert(&TreePath::root(), 1), Err(TreeError::EmptyPath));
    }
}
