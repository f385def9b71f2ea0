#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem::size_of;
use std::str::FromStr;

use bumpalo::{Bump, collections::Vec as BumpVec};
use lf_columnar::{Column, ColumnError};
use lf_frame::{FrameError, LabeledTable};
use lf_index::Index;
use lf_types::{ErrorKind, Scalar, ScalarKey};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl JoinType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinType {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            _ => Err(JoinError::UnsupportedJoinType { how: s.to_owned() }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JoinError {
    #[error("unsupported join type '{how}' (expected inner, left or right)")]
    UnsupportedJoinType { how: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl JoinError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedJoinType { .. } => ErrorKind::UnsupportedJoinType,
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    /// Appended to right-side column names that collide with a left column.
    pub suffix: String,
    /// Placed between the left and right row labels of a matched row.
    pub label_separator: String,
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            suffix: "_right".to_owned(),
            label_separator: "_".to_owned(),
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

pub fn join(
    left: &LabeledTable,
    right: &LabeledTable,
    on: &str,
    join_type: JoinType,
) -> Result<LabeledTable, JoinError> {
    join_with_options(left, right, on, join_type, &JoinOptions::default())
}

/// Equality join on the `on` column present in both tables.
///
/// Rows follow the driving side (left for inner/left, right for right),
/// each expanded over its matches in the other table's row order. Missing
/// keys never match.
pub fn join_with_options(
    left: &LabeledTable,
    right: &LabeledTable,
    on: &str,
    join_type: JoinType,
    options: &JoinOptions,
) -> Result<LabeledTable, JoinError> {
    let (joined, _) = join_with_trace(left, right, on, join_type, options)?;
    Ok(joined)
}

/// Positions of each non-missing key, in row order.
fn build_key_map(keys: &[Scalar]) -> HashMap<ScalarKey, Vec<usize>> {
    let mut map = HashMap::<ScalarKey, Vec<usize>>::new();
    for (pos, key) in keys.iter().enumerate() {
        let key = key.to_key();
        if !key.is_missing() {
            map.entry(key).or_default().push(pos);
        }
    }
    map
}

/// Driving-side probe: one `(driver, Some(match))` per match, or
/// `(driver, None)` for an unmatched row when `keep_unmatched`.
fn probe(
    driver_keys: &[Scalar],
    build_map: &HashMap<ScalarKey, Vec<usize>>,
    keep_unmatched: bool,
    mut emit: impl FnMut(usize, Option<usize>),
) {
    for (pos, key) in driver_keys.iter().enumerate() {
        match build_map.get(&key.to_key()) {
            Some(matches) => {
                for other in matches {
                    emit(pos, Some(*other));
                }
            }
            None if keep_unmatched => emit(pos, None),
            None => {}
        }
    }
}

fn estimate_output_rows(
    driver_keys: &[Scalar],
    build_map: &HashMap<ScalarKey, Vec<usize>>,
    keep_unmatched: bool,
) -> usize {
    let mut rows = 0;
    probe(driver_keys, build_map, keep_unmatched, |_, _| rows += 1);
    rows
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<Option<usize>>().saturating_mul(2))
}

#[instrument(skip_all, fields(left_rows = left.len(), right_rows = right.len(), on = %on, how = %join_type))]
fn join_with_trace(
    left: &LabeledTable,
    right: &LabeledTable,
    on: &str,
    join_type: JoinType,
    options: &JoinOptions,
) -> Result<(LabeledTable, JoinExecutionTrace), JoinError> {
    let left_keys = left.column_values(on)?.values();
    let right_keys = right.column_values(on)?.values();

    let (driver_keys, build_keys) = match join_type {
        JoinType::Inner | JoinType::Left => (left_keys, right_keys),
        JoinType::Right => (right_keys, left_keys),
    };
    let keep_unmatched = !matches!(join_type, JoinType::Inner);
    let build_map = build_key_map(build_keys);

    let output_rows = estimate_output_rows(driver_keys, &build_map, keep_unmatched);
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    let joined = if use_arena {
        let arena = Bump::new();
        let mut left_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        let mut right_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        probe(driver_keys, &build_map, keep_unmatched, |driver, other| {
            let (l, r) = orient(join_type, driver, other);
            left_positions.push(l);
            right_positions.push(r);
        });
        assemble(
            left,
            right,
            on,
            left_positions.as_slice(),
            right_positions.as_slice(),
            options,
        )?
    } else {
        let mut left_positions = Vec::<Option<usize>>::with_capacity(output_rows);
        let mut right_positions = Vec::<Option<usize>>::with_capacity(output_rows);
        probe(driver_keys, &build_map, keep_unmatched, |driver, other| {
            let (l, r) = orient(join_type, driver, other);
            left_positions.push(l);
            right_positions.push(r);
        });
        assemble(left, right, on, &left_positions, &right_positions, options)?
    };

    debug!(output_rows, used_arena = use_arena, "joined tables");
    Ok((
        joined,
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
            estimated_bytes,
        },
    ))
}

fn orient(join_type: JoinType, driver: usize, other: Option<usize>) -> (Option<usize>, Option<usize>) {
    match join_type {
        JoinType::Inner | JoinType::Left => (Some(driver), other),
        JoinType::Right => (other, Some(driver)),
    }
}

fn assemble(
    left: &LabeledTable,
    right: &LabeledTable,
    on: &str,
    left_positions: &[Option<usize>],
    right_positions: &[Option<usize>],
    options: &JoinOptions,
) -> Result<LabeledTable, JoinError> {
    let left_labels = left.index().labels();
    let right_labels = right.index().labels();
    let labels: Index = left_positions
        .iter()
        .zip(right_positions)
        .map(|(l, r)| match (l, r) {
            (Some(l), Some(r)) => format!(
                "{}{}{}",
                left_labels[*l], options.label_separator, right_labels[*r]
            ),
            (Some(l), None) => left_labels[*l].clone(),
            (None, Some(r)) => right_labels[*r].clone(),
            (None, None) => String::new(),
        })
        .collect();

    let left_keys = left.column_values(on)?.values();
    let right_keys = right.column_values(on)?.values();
    let key_values: Vec<Scalar> = left_positions
        .iter()
        .zip(right_positions)
        .map(|(l, r)| match (l, r) {
            (Some(l), _) => left_keys[*l].clone(),
            (None, Some(r)) => right_keys[*r].clone(),
            (None, None) => Scalar::null(),
        })
        .collect();
    let key_column = Column::from_values(key_values)?;

    let mut used: HashSet<String> = left.column_names().iter().cloned().collect();
    let mut columns = Vec::with_capacity(left.num_columns() + right.num_columns());
    for (name, column) in left.iter_columns() {
        if name == on {
            columns.push((name.to_owned(), key_column.clone()));
        } else {
            columns.push((name.to_owned(), column.reindex_by_positions(left_positions)?));
        }
    }
    for (name, column) in right.iter_columns() {
        if name == on {
            continue;
        }
        let mut out_name = name.to_owned();
        while used.contains(&out_name) {
            out_name.push_str(&options.suffix);
        }
        used.insert(out_name.clone());
        columns.push((out_name, column.reindex_by_positions(right_positions)?));
    }

    Ok(LabeledTable::new(labels, columns)?)
}

#[cfg(test)]
mod tests {
    use lf_frame::LabeledTable;
    use lf_types::{ErrorKind, Scalar};

    use super::{JoinOptions, JoinType, join, join_with_options, join_with_trace};

    fn people() -> LabeledTable {
        LabeledTable::from_columns(vec![
            ("id", vec![Scalar::Int64(1), Scalar::Int64(2)]),
            ("name", vec![Scalar::from("Alice"), Scalar::from("Bob")]),
        ])
        .expect("people")
    }

    fn scores() -> LabeledTable {
        LabeledTable::from_columns(vec![
            ("id", vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(4)]),
            (
                "score",
                vec![Scalar::Int64(10), Scalar::Int64(20), Scalar::Int64(30)],
            ),
        ])
        .expect("scores")
    }

    #[test]
    fn inner_join_keeps_matching_ids() {
        let out = join(&people(), &scores(), "id", JoinType::Inner).expect("join");
        assert_eq!(out.len(), 2);
        assert_eq!(out.column_names(), &["id", "name", "score"]);
        assert_eq!(out.index().labels(), &["0_0", "1_1"]);
        assert_eq!(
            out.column_values("score").expect("score").values(),
            &[Scalar::Int64(10), Scalar::Int64(20)]
        );
    }

    #[test]
    fn left_join_without_unmatched_rows_has_no_nulls() {
        let out = join(&people(), &scores(), "id", JoinType::Left).expect("join");
        assert_eq!(out.len(), 2);
        assert!(
            out.column_values("score")
                .expect("score")
                .values()
                .iter()
                .all(|v| !v.is_missing())
        );
    }

    #[test]
    fn left_join_null_fills_unmatched_rows() {
        let out = join(&scores(), &people(), "id", JoinType::Left).expect("join");
        assert_eq!(out.len(), 3);
        let names = out.column_values("name").expect("name").values();
        assert!(!names[0].is_missing());
        assert!(names[2].is_missing());
        assert_eq!(out.index().labels()[2], "2");
    }

    #[test]
    fn right_join_follows_right_order_and_carries_right_key() {
        let out = join(&people(), &scores(), "id", JoinType::Right).expect("join");
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.column_values("id").expect("id").values(),
            &[Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(4)]
        );
        assert!(out.column_values("name").expect("name").values()[2].is_missing());
        assert_eq!(out.index().labels(), &["0_0", "1_1", "2"]);
    }

    #[test]
    fn duplicate_keys_multiply_cardinality() {
        let left = LabeledTable::from_columns(vec![
            ("k", ["a", "a", "b"].map(Scalar::from).to_vec()),
            ("v", [1, 2, 3].map(Scalar::Int64).to_vec()),
        ])
        .expect("left");
        let right = LabeledTable::from_columns(vec![
            ("k", ["a", "a"].map(Scalar::from).to_vec()),
            ("v", [10, 20].map(Scalar::Int64).to_vec()),
        ])
        .expect("right");
        let out = join(&left, &right, "k", JoinType::Inner).expect("join");
        assert_eq!(out.len(), 4);
        assert_eq!(out.column_names(), &["k", "v", "v_right"]);
        assert_eq!(
            out.column_values("v").expect("v").values(),
            &[1, 1, 2, 2].map(Scalar::Int64)
        );
        assert_eq!(
            out.column_values("v_right").expect("v_right").values(),
            &[10, 20, 10, 20].map(Scalar::Int64)
        );
    }

    #[test]
    fn missing_keys_never_match() {
        let left = LabeledTable::from_columns(vec![("k", vec![Scalar::null(), Scalar::Int64(1)])])
            .expect("left");
        let right = LabeledTable::from_columns(vec![
            ("k", vec![Scalar::null(), Scalar::Int64(1)]),
            ("x", vec![Scalar::from("n"), Scalar::from("one")]),
        ])
        .expect("right");
        let inner = join(&left, &right, "k", JoinType::Inner).expect("join");
        assert_eq!(inner.len(), 1);
        let left_out = join(&left, &right, "k", JoinType::Left).expect("join");
        assert!(left_out.column_values("x").expect("x").values()[0].is_missing());
    }

    #[test]
    fn missing_join_column_and_bad_type_fail() {
        let err = join(&people(), &scores(), "name", JoinType::Inner).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        let err = "outer".parse::<JoinType>().expect_err("unsupported");
        assert_eq!(err.kind(), ErrorKind::UnsupportedJoinType);
        assert_eq!("LEFT".parse::<JoinType>().expect("left"), JoinType::Left);
    }

    #[test]
    fn custom_suffix_and_separator() {
        let options = JoinOptions {
            suffix: "_r".to_owned(),
            label_separator: "/".to_owned(),
            ..JoinOptions::default()
        };
        let right = scores();
        let mut left = people();
        left.set_column("score", left.column_values("id").expect("id").clone())
            .expect("set");
        let out = join_with_options(&left, &right, "id", JoinType::Inner, &options).expect("join");
        assert_eq!(out.column_names(), &["id", "name", "score", "score_r"]);
        assert_eq!(out.index().labels()[0], "0/0");
    }

    #[test]
    fn arena_and_global_paths_agree() {
        let arena = JoinOptions::default();
        let global = JoinOptions {
            use_arena: false,
            ..JoinOptions::default()
        };
        let (with_arena, arena_trace) =
            join_with_trace(&scores(), &people(), "id", JoinType::Left, &arena).expect("arena");
        let (without, global_trace) =
            join_with_trace(&scores(), &people(), "id", JoinType::Left, &global).expect("global");
        assert!(arena_trace.used_arena);
        assert!(!global_trace.used_arena);
        assert_eq!(arena_trace.output_rows, 3);
        assert!(arena_trace.estimated_bytes > 0);
        assert_eq!(with_arena, without);
    }

    #[test]
    fn arena_budget_fallback() {
        let tiny = JoinOptions {
            arena_budget_bytes: 1,
            ..JoinOptions::default()
        };
        let (_, trace) =
            join_with_trace(&people(), &scores(), "id", JoinType::Inner, &tiny).expect("join");
        assert!(!trace.used_arena);
    }
}
