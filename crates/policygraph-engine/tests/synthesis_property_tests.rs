use policygraph_engine::{
    build_aggregation_functions, couple_group_ids, derive_implicit_aggregation_specs,
    family_group_ids, AggregationKind, AggregationSpecsTree, DataTree, FamilyColumns,
    FunctionsTree, InputTypes, NamingConventions, PolicyFunction, TargetsTree, TreePath,
    TypeSources,
};
use policygraph_tree::merge;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// `[ns0__]base[_suffix]`; bases never carry a grouping suffix themselves.
fn name() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just(""), Just("ns0__"), Just("ns1__")],
        "[a-z]{1,5}",
        prop_oneof![Just(""), Just("_hh"), Just("_bg"), Just("_ehe")],
    )
        .prop_map(|(ns, base, suffix)| format!("{ns}{base}{suffix}"))
}

fn path(name: &str) -> TreePath {
    TreePath::from_qualified_name(name).expect("generated names are valid")
}

fn functions() -> impl Strategy<Value = FunctionsTree> {
    proptest::collection::vec(proptest::collection::vec(name(), 0..4), 0..6).prop_map(|params| {
        let functions = params.into_iter().enumerate().map(|(i, params)| {
            let function = params
                .into_iter()
                .fold(PolicyFunction::external(format!("fn{i}"), "f"), |b, p| b.param(p))
                .build()
                .expect("generated function is valid");
            (function.path().clone(), function)
        });
        FunctionsTree::from_leaves(functions).expect("distinct function names")
    })
}

fn targets() -> impl Strategy<Value = TargetsTree> {
    proptest::collection::vec(name(), 0..5).prop_map(|names| {
        TargetsTree::from_leaves(names.iter().map(|n| (path(n), ()))).expect("valid")
    })
}

fn data() -> impl Strategy<Value = DataTree> {
    proptest::collection::vec(name(), 0..5).prop_map(|names| {
        DataTree::from_leaves(names.iter().map(|n| (path(n), None))).expect("valid")
    })
}

/// Person-level relations over `n` persons plus a consistent reordering.
#[derive(Debug, Clone)]
struct Household {
    hh_id: Vec<i64>,
    age: Vec<i64>,
    partner: Vec<Option<usize>>,
    parent_1: Vec<Option<usize>>,
    parent_2: Vec<Option<usize>>,
    order: Vec<usize>,
}

fn household() -> impl Strategy<Value = Household> {
    (1..12usize).prop_flat_map(|n| {
        let link = proptest::option::weighted(0.4, 0..n + 1);
        (
            proptest::collection::vec(0..3i64, n),
            proptest::collection::vec(0..70i64, n),
            proptest::collection::vec(link.clone(), n),
            proptest::collection::vec(link.clone(), n),
            proptest::collection::vec(link, n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        )
            .prop_map(|(hh_id, age, partner, parent_1, parent_2, order)| Household {
                hh_id,
                age,
                partner,
                parent_1,
                parent_2,
                order,
            })
    })
}

/// Person `i` has id `100 + i`; index `n` stands for a dangling reference.
fn ids(links: &[Option<usize>], order: &[usize]) -> Vec<i64> {
    order
        .iter()
        .map(|&i| links[i].map_or(-1, |target| 100 + target as i64))
        .collect()
}

fn reorder(values: &[i64], order: &[usize]) -> Vec<i64> {
    order.iter().map(|&i| values[i]).collect()
}

fn family(h: &Household, order: &[usize]) -> Vec<i64> {
    let p_id: Vec<i64> = order.iter().map(|&i| 100 + i as i64).collect();
    let hh_id = reorder(&h.hh_id, order);
    let age = reorder(&h.age, order);
    let partner = ids(&h.partner, order);
    let parent_1 = ids(&h.parent_1, order);
    let parent_2 = ids(&h.parent_2, order);
    family_group_ids(
        FamilyColumns {
            p_id: &p_id,
            hh_id: &hh_id,
            age: &age,
            partner_id: &partner,
            parent_id_1: &parent_1,
            parent_id_2: &parent_2,
        },
        25,
    )
    .expect("aligned columns")
}

fn couple(h: &Household, order: &[usize]) -> Vec<i64> {
    let p_id: Vec<i64> = order.iter().map(|&i| 100 + i as i64).collect();
    couple_group_ids(&p_id, &ids(&h.partner, order)).expect("aligned columns")
}

/// `out[k]` belongs to person `order[k]`; index it by person instead.
fn by_person(out: &[i64], order: &[usize]) -> Vec<i64> {
    let mut per_person = vec![0; out.len()];
    for (k, &person) in order.iter().enumerate() {
        per_person[person] = out[k];
    }
    per_person
}

fn same_partition(a: &[i64], b: &[i64]) -> bool {
    (0..a.len()).all(|i| (0..a.len()).all(|j| (a[i] == a[j]) == (b[i] == b[j])))
}

fn dense_from_zero(ids: &[i64]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    let mut next = 0;
    for &id in ids {
        if seen.insert(id) {
            if id != next {
                return false;
            }
            next += 1;
        }
    }
    true
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn implicit_aggregation_is_idempotent(
        functions in functions(),
        targets in targets(),
        data in data(),
    ) {
        let vocab = NamingConventions::default().compile().expect("default conventions");
        let none = AggregationSpecsTree::new();

        let specs = derive_implicit_aggregation_specs(&functions, &targets, &data, &none, &vocab)
            .expect("derivation succeeds");
        for (target, _) in specs.flatten_with_path() {
            prop_assert!(!functions.contains(&target));
            prop_assert!(!data.contains(&target));
        }

        let input_types = InputTypes::new();
        let built = build_aggregation_functions(
            &specs,
            AggregationKind::Group,
            &TypeSources::new(&functions, &input_types, &data),
            &vocab,
        )
        .expect("implicit specs carry grouping suffixes");
        prop_assert_eq!(built.len(), specs.len());

        let merged = merge(&functions, &built);
        let again = derive_implicit_aggregation_specs(&merged, &targets, &data, &none, &vocab)
            .expect("derivation succeeds");
        prop_assert!(again.is_empty());
    }

    #[test]
    fn couple_grouping_is_order_equivariant(h in household()) {
        let identity: Vec<usize> = (0..h.order.len()).collect();
        let original = couple(&h, &identity);
        let shuffled = by_person(&couple(&h, &h.order), &h.order);

        prop_assert_eq!(original.len(), identity.len());
        prop_assert!(dense_from_zero(&original));
        prop_assert!(same_partition(&original, &shuffled));
    }

    #[test]
    fn family_grouping_is_order_equivariant(h in household()) {
        let identity: Vec<usize> = (0..h.order.len()).collect();
        let original = family(&h, &identity);
        let shuffled = by_person(&family(&h, &h.order), &h.order);

        prop_assert_eq!(original.len(), identity.len());
        prop_assert!(dense_from_zero(&original));
        prop_assert!(same_partition(&original, &shuffled));
    }

    #[test]
    fn partners_always_share_a_family(h in household()) {
        let identity: Vec<usize> = (0..h.order.len()).collect();
        let groups = family(&h, &identity);
        for (person, partner) in h.partner.iter().enumerate() {
            if let Some(partner) = partner.filter(|&p| p < groups.len()) {
                prop_assert_eq!(groups[person], groups[partner]);
            }
        }
    }
}
