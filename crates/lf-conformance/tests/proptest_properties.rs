#![forbid(unsafe_code)]

//! Property-based checks of the structural invariants of the table engine:
//! construction lengths, record round-trips, group partitions, join
//! cardinality, stable sorting and the rolling-window definition.

use std::collections::HashSet;

use lf_frame::LabeledTable;
use lf_groupby::group_by;
use lf_join::{JoinType, join};
use lf_stats::{RollingStat, rolling_values};
use lf_types::{ErrorKind, Scalar};
use proptest::prelude::*;

fn arb_int_cell() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        8 => (-50i64..50).prop_map(Scalar::Int64),
        1 => Just(Scalar::null()),
    ]
}

fn arb_text_cell() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        6 => prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(Scalar::from),
        1 => Just(Scalar::null()),
    ]
}

/// A table with one categorical and one integer column of equal length.
fn arb_table(max_rows: usize) -> impl Strategy<Value = LabeledTable> {
    (0..=max_rows).prop_flat_map(|rows| {
        (
            proptest::collection::vec(arb_text_cell(), rows),
            proptest::collection::vec(arb_int_cell(), rows),
        )
            .prop_map(|(cat, num)| {
                LabeledTable::from_columns(vec![("cat", cat), ("num", num)])
                    .expect("equal lengths")
            })
    })
}

fn arb_window_input() -> impl Strategy<Value = (Vec<Option<f64>>, usize)> {
    proptest::collection::vec(
        prop_oneof![
            6 => (-1e3..1e3f64).prop_map(Some),
            1 => Just(None),
        ],
        0..40,
    )
    .prop_flat_map(|values| (Just(values), 1usize..6))
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_mismatched_columns_are_rejected(a in 0usize..20, b in 0usize..20) {
        prop_assume!(a != b);
        let result = LabeledTable::from_columns(vec![
            ("x", vec![Scalar::Int64(1); a]),
            ("y", vec![Scalar::Int64(2); b]),
        ]);
        let err = result.expect_err("lengths differ");
        prop_assert_eq!(err.kind(), ErrorKind::LengthMismatch);
    }

    #[test]
    fn prop_every_column_matches_index_length(table in arb_table(30)) {
        for (_, column) in table.iter_columns() {
            prop_assert_eq!(column.len(), table.index().len());
        }
    }

    #[test]
    fn prop_records_round_trip(table in arb_table(30)) {
        prop_assume!(!table.is_empty());
        let rebuilt = LabeledTable::from_records(&table.to_records()).expect("rebuild");
        prop_assert_eq!(rebuilt.len(), table.len());
        prop_assert_eq!(rebuilt.to_columns(), table.to_columns());
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_groups_partition_rows(table in arb_table(40)) {
        let grouped = group_by(&table, &["cat"]).expect("group");
        let total: usize = grouped.groups().iter().map(|g| g.len()).sum();
        prop_assert_eq!(total, table.len());

        let mut seen = HashSet::new();
        for group in grouped.groups() {
            prop_assert_eq!(group.table().len(), group.positions().len());
            for &pos in group.positions() {
                prop_assert!(seen.insert(pos), "row {} appears twice", pos);
            }
        }
        prop_assert_eq!(seen.len(), table.len());
    }

    #[test]
    fn prop_group_rows_share_their_key(table in arb_table(40)) {
        let grouped = group_by(&table, &["cat"]).expect("group");
        let cats = table.column_values("cat").expect("cat").values();
        for group in grouped.groups() {
            let key = &group.key().values()[0];
            for &pos in group.positions() {
                prop_assert!(cats[pos].semantic_eq(key));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Joining
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(150))]

    #[test]
    fn prop_inner_join_on_unique_keys(
        left_keys in proptest::collection::hash_set(0i64..30, 0..15),
        right_keys in proptest::collection::hash_set(0i64..30, 0..15),
    ) {
        let left_keys: Vec<i64> = left_keys.into_iter().collect();
        let right_keys: Vec<i64> = right_keys.into_iter().collect();
        let left = LabeledTable::from_columns(vec![
            ("k", left_keys.iter().copied().map(Scalar::Int64).collect()),
            ("lv", left_keys.iter().map(|k| Scalar::Int64(k * 10)).collect()),
        ]).expect("left");
        let right = LabeledTable::from_columns(vec![
            ("k", right_keys.iter().copied().map(Scalar::Int64).collect()),
            ("rv", right_keys.iter().map(|k| Scalar::Int64(k * 100)).collect()),
        ]).expect("right");

        let shared = left_keys.iter().filter(|k| right_keys.contains(k)).count();
        let inner = join(&left, &right, "k", JoinType::Inner).expect("inner");
        prop_assert_eq!(inner.len(), shared);

        let outer = join(&left, &right, "k", JoinType::Left).expect("left");
        prop_assert!(outer.len() >= left.len());
        prop_assert_eq!(outer.len(), left.len());
        let keys = outer.column_values("k").expect("k").values();
        let rv = outer.column_values("rv").expect("rv").values();
        for (key, value) in keys.iter().zip(rv) {
            let Scalar::Int64(k) = key else {
                return Err(TestCaseError::fail("left key lost"));
            };
            prop_assert_eq!(value.is_missing(), !right_keys.contains(k));
        }
    }
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_sort_is_a_permutation(table in arb_table(40), ascending in any::<bool>()) {
        let sorted = table.sort_by(&["num"], ascending).expect("sort");
        prop_assert_eq!(sorted.len(), table.len());

        let mut before: Vec<String> = table.index().labels().to_vec();
        let mut after: Vec<String> = sorted.index().labels().to_vec();
        before.sort();
        after.sort();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_ascending_sort_is_non_decreasing(
        values in proptest::collection::vec(-100i64..100, 0..40),
    ) {
        let table = LabeledTable::from_columns(vec![
            ("num", values.iter().copied().map(Scalar::Int64).collect()),
        ]).expect("table");
        let sorted = table.sort_by(&["num"], true).expect("sort");
        let nums: Vec<i64> = sorted
            .column_values("num")
            .expect("num")
            .values()
            .iter()
            .filter_map(|v| match v {
                Scalar::Int64(n) => Some(*n),
                _ => None,
            })
            .collect();
        prop_assert_eq!(nums.len(), values.len());
        prop_assert!(nums.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn prop_equal_keys_keep_row_order(
        values in proptest::collection::vec(0i64..3, 0..40),
    ) {
        let table = LabeledTable::from_columns(vec![
            ("num", values.iter().copied().map(Scalar::Int64).collect()),
        ]).expect("table");
        let sorted = table.sort_by(&["num"], true).expect("sort");
        let labels = sorted.index().labels();
        for pair in labels.windows(2) {
            let a: usize = pair[0].parse().expect("range label");
            let b: usize = pair[1].parse().expect("range label");
            if values[a] == values[b] {
                prop_assert!(a < b, "tie reordered: {} before {}", a, b);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rolling windows
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_rolling_mean_matches_window_definition((values, window) in arb_window_input()) {
        let rolled = rolling_values(&values, window, RollingStat::Mean).expect("rolling");
        prop_assert_eq!(rolled.len(), values.len());
        for (i, got) in rolled.iter().enumerate() {
            if i + 1 < window {
                prop_assert!(got.is_nan(), "position {} before window fills", i);
                continue;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(Option::is_none) {
                prop_assert!(got.is_nan());
                continue;
            }
            let expected = slice.iter().flatten().sum::<f64>() / window as f64;
            prop_assert!((got - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }
    }
}
