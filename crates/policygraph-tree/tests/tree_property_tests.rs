use std::collections::BTreeSet;

use policygraph_tree::{merge, NestedTree, TreePath};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    // Identifier-like segments that never end with `_` and never contain `__`.
    proptest::string::string_regex("_?[a-z][a-z0-9]{0,6}(_[a-z0-9]{1,4}){0,2}").unwrap()
}

fn path() -> impl Strategy<Value = TreePath> {
    proptest::collection::vec(segment(), 1..=5)
        .prop_map(|segments| TreePath::new(segments).expect("generated segments are valid"))
}

/// Fixed-depth paths, so no leaf of one tree can sit on a namespace of another.
fn depth_two_tree() -> impl Strategy<Value = NestedTree<u32>> {
    proptest::collection::vec(((segment(), segment()), any::<u32>()), 0..12).prop_map(|leaves| {
        NestedTree::from_leaves(leaves.into_iter().map(|((ns, leaf), value)| {
            (TreePath::new([ns, leaf]).expect("valid"), value)
        }))
        .expect("non-empty paths")
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn qualified_name_round_trip(p in path()) {
        let name = p.to_qualified_name();
        let back = TreePath::from_qualified_name(&name).expect("round trip parses");
        prop_assert_eq!(back, p);
    }

    #[test]
    fn merge_overwrites_with_update_and_keeps_union(a in depth_two_tree(), b in depth_two_tree()) {
        let merged = merge(&a, &b);

        let expected: BTreeSet<TreePath> = a.paths().union(&b.paths()).cloned().collect();
        prop_assert_eq!(merged.paths(), expected);

        for (path, value) in b.flatten_with_path() {
            prop_assert_eq!(merged.get(&path), Ok(value));
        }
        for (path, value) in a.flatten_with_path() {
            if !b.contains(&path) {
                prop_assert_eq!(merged.get(&path), Ok(value));
            }
        }
    }

    #[test]
    fn update_then_get_returns_value(t in depth_two_tree(), p in path(), v in any::<u32>()) {
        let updated = t.update(&p, v).expect("non-empty path");
        prop_assert_eq!(updated.get(&p), Ok(&v));
    }
}
