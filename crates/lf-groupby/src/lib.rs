#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::str::FromStr;

use lf_columnar::{Column, ColumnError};
use lf_frame::{FrameError, LabeledTable};
use lf_index::Index;
use lf_types::{
    DType, ErrorKind, Scalar, ScalarKey, collect_numbers, maximum, mean, median, minimum,
    sample_std, variance,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupByOptions {
    /// Skip rows whose key holds a missing value instead of grouping them.
    pub dropna: bool,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupByError {
    #[error("group-by needs at least one key column")]
    NoKeys,
    #[error("unsupported aggregation method '{method}'")]
    UnsupportedAggregation { method: String },
    #[error("aggregation {func} is not defined for column '{column}' of dtype {dtype}")]
    UnsupportedType {
        column: String,
        func: AggFunc,
        dtype: DType,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl GroupByError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoKeys => ErrorKind::InvalidArgument,
            Self::UnsupportedAggregation { .. } => ErrorKind::UnsupportedAggregationMethod,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

/// Aggregation function selector for grouped columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    First,
    Last,
    Std,
    Var,
    Median,
}

impl AggFunc {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::Std => "std",
            Self::Var => "var",
            Self::Median => "median",
        }
    }

    /// `count`, `first` and `last` work on any dtype.
    #[must_use]
    pub fn requires_numeric(self) -> bool {
        !matches!(self, Self::Count | Self::First | Self::Last)
    }

    fn apply(self, values: &[Scalar]) -> Scalar {
        match self {
            Self::Count => {
                let n = values.iter().filter(|v| !v.is_missing()).count();
                Scalar::Int64(i64::try_from(n).unwrap_or(i64::MAX))
            }
            Self::First => values
                .iter()
                .find(|v| !v.is_missing())
                .cloned()
                .unwrap_or_else(Scalar::null),
            Self::Last => values
                .iter()
                .rev()
                .find(|v| !v.is_missing())
                .cloned()
                .unwrap_or_else(Scalar::null),
            numeric => Scalar::Float64(numeric.reduce(&collect_numbers(values))),
        }
    }

    fn reduce(self, nums: &[f64]) -> f64 {
        match self {
            Self::Sum => nums.iter().sum(),
            Self::Mean => mean(nums),
            Self::Min => minimum(nums),
            Self::Max => maximum(nums),
            Self::Var => variance(nums, 1),
            Self::Std => sample_std(nums),
            Self::Median => median(nums),
            Self::Count | Self::First | Self::Last => f64::NAN,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggFunc {
    type Err = GroupByError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let func = match s.to_ascii_lowercase().as_str() {
            "sum" => Self::Sum,
            "mean" | "avg" => Self::Mean,
            "count" => Self::Count,
            "min" => Self::Min,
            "max" => Self::Max,
            "first" => Self::First,
            "last" => Self::Last,
            "std" => Self::Std,
            "var" => Self::Var,
            "median" => Self::Median,
            _ => {
                return Err(GroupByError::UnsupportedAggregation {
                    method: s.to_owned(),
                });
            }
        };
        Ok(func)
    }
}

/// Typed group key: the bare value for one key column, the ordered values
/// for several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupKey {
    Single(Scalar),
    Composite(Vec<Scalar>),
}

impl GroupKey {
    fn from_values(mut values: Vec<Scalar>) -> Self {
        if values.len() == 1 {
            Self::Single(values.remove(0))
        } else {
            Self::Composite(values)
        }
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Composite(values) => values,
        }
    }

    /// Structural identity; `Int64(1)` and `Float64(1.0)` are the same key.
    #[must_use]
    pub fn matches(&self, values: &[Scalar]) -> bool {
        let own = self.values();
        own.len() == values.len()
            && own
                .iter()
                .zip(values)
                .all(|(left, right)| left.to_key() == right.to_key())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => write!(f, "{value}"),
            Self::Composite(values) => {
                f.write_str("(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One bucket: its key, the source row positions and the rows themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    key: GroupKey,
    positions: Vec<usize>,
    table: LabeledTable,
}

impl Group {
    #[must_use]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    #[must_use]
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    #[must_use]
    pub fn table(&self) -> &LabeledTable {
        &self.table
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Groups in order of each key's first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    by: Vec<String>,
    value_columns: Vec<String>,
    groups: Vec<Group>,
}

impl GroupBy {
    #[must_use]
    pub fn by(&self) -> &[String] {
        &self.by
    }

    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group whose key equals `values` (one value per key column).
    #[must_use]
    pub fn get(&self, values: &[Scalar]) -> Option<&Group> {
        self.groups.iter().find(|group| group.key.matches(values))
    }

    #[must_use]
    pub fn sizes(&self) -> Vec<(GroupKey, usize)> {
        self.groups
            .iter()
            .map(|group| (group.key.clone(), group.len()))
            .collect()
    }

    fn key_index(&self) -> Index {
        self.groups.iter().map(|g| g.key.to_string()).collect()
    }

    /// Aggregate one non-key column, one row per group.
    pub fn aggregate_column(&self, column: &str, func: AggFunc) -> Result<Column, GroupByError> {
        let mut out = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let values = group.table.column_values(column)?;
            if func.requires_numeric() && !values.is_numeric() {
                return Err(GroupByError::UnsupportedType {
                    column: column.to_owned(),
                    func,
                    dtype: values.dtype(),
                });
            }
            out.push(func.apply(values.values()));
        }
        Ok(Column::from_values(out)?)
    }

    /// Key columns followed by `func` over every eligible value column,
    /// indexed by the key text. Numeric-only functions skip text columns.
    pub fn aggregate(&self, func: AggFunc) -> Result<LabeledTable, GroupByError> {
        let mut columns = Vec::with_capacity(self.by.len() + self.value_columns.len());
        for (slot, name) in self.by.iter().enumerate() {
            let keys = self
                .groups
                .iter()
                .map(|group| group.key.values()[slot].clone())
                .collect();
            columns.push((name.clone(), Column::from_values(keys)?));
        }
        for name in &self.value_columns {
            match self.aggregate_column(name, func) {
                Ok(column) => columns.push((name.clone(), column)),
                Err(GroupByError::UnsupportedType { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(LabeledTable::new(self.key_index(), columns)?)
    }

    pub fn sum(&self) -> Result<LabeledTable, GroupByError> {
        self.aggregate(AggFunc::Sum)
    }

    pub fn mean(&self) -> Result<LabeledTable, GroupByError> {
        self.aggregate(AggFunc::Mean)
    }

    pub fn count(&self) -> Result<LabeledTable, GroupByError> {
        self.aggregate(AggFunc::Count)
    }
}

pub fn group_by(table: &LabeledTable, by: &[&str]) -> Result<GroupBy, GroupByError> {
    group_by_with_options(table, by, GroupByOptions::default())
}

/// Bucket rows by the structural tuple of their `by` values.
///
/// Each group keeps its rows in original order; groups are ordered by
/// first appearance of their key.
#[instrument(skip_all, fields(rows = table.len(), keys = by.len()))]
pub fn group_by_with_options(
    table: &LabeledTable,
    by: &[&str],
    options: GroupByOptions,
) -> Result<GroupBy, GroupByError> {
    if by.is_empty() {
        return Err(GroupByError::NoKeys);
    }
    let key_columns = by
        .iter()
        .map(|name| Ok(table.column_values(name)?.values()))
        .collect::<Result<Vec<_>, FrameError>>()?;

    let mut slots = HashMap::<Vec<ScalarKey>, usize>::new();
    let mut buckets: Vec<(usize, Vec<usize>)> = Vec::new();
    for row in 0..table.len() {
        let key: Vec<ScalarKey> = key_columns.iter().map(|c| c[row].to_key()).collect();
        if options.dropna && key.iter().any(ScalarKey::is_missing) {
            continue;
        }
        match slots.entry(key) {
            Entry::Occupied(slot) => buckets[*slot.get()].1.push(row),
            Entry::Vacant(slot) => {
                slot.insert(buckets.len());
                buckets.push((row, vec![row]));
            }
        }
    }

    let groups = buckets
        .into_iter()
        .map(|(first, positions)| {
            let values = key_columns.iter().map(|c| c[first].clone()).collect();
            Ok(Group {
                key: GroupKey::from_values(values),
                table: table.take(&positions)?,
                positions,
            })
        })
        .collect::<Result<Vec<_>, FrameError>>()?;

    let value_columns = table
        .column_names()
        .iter()
        .filter(|name| !by.contains(&name.as_str()))
        .cloned()
        .collect();

    debug!(groups = groups.len(), "grouped rows");
    Ok(GroupBy {
        by: by.iter().map(|name| (*name).to_owned()).collect(),
        value_columns,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use lf_frame::LabeledTable;
    use lf_types::{ErrorKind, Scalar};

    use super::{AggFunc, GroupByError, GroupByOptions, GroupKey, group_by, group_by_with_options};

    fn category_table() -> LabeledTable {
        LabeledTable::from_columns(vec![
            (
                "category",
                ["A", "B", "A", "B", "A"].map(Scalar::from).to_vec(),
            ),
            ("value", [1, 2, 3, 4, 5].map(Scalar::Int64).to_vec()),
        ])
        .expect("table")
    }

    #[test]
    fn groups_follow_first_appearance_and_row_order() {
        let grouped = group_by(&category_table(), &["category"]).expect("group");
        assert_eq!(grouped.len(), 2);
        let a = grouped.get(&[Scalar::from("A")]).expect("group A");
        assert_eq!(a.key(), &GroupKey::Single(Scalar::from("A")));
        assert_eq!(
            a.table().column_values("value").expect("value").values(),
            &[Scalar::Int64(1), Scalar::Int64(3), Scalar::Int64(5)]
        );
        assert_eq!(a.table().index().labels(), &["0", "2", "4"]);
        let b = grouped.get(&[Scalar::from("B")]).expect("group B");
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn groups_partition_every_row_once() {
        let table = category_table();
        let grouped = group_by(&table, &["category"]).expect("group");
        let mut seen: Vec<usize> = grouped
            .groups()
            .iter()
            .flat_map(|g| g.positions().to_vec())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..table.len()).collect::<Vec<_>>());
    }

    #[test]
    fn composite_keys_are_structural() {
        let table = LabeledTable::from_columns(vec![
            ("a", ["x|y", "x"].map(Scalar::from).to_vec()),
            ("b", ["z", "y|z"].map(Scalar::from).to_vec()),
        ])
        .expect("table");
        let grouped = group_by(&table, &["a", "b"]).expect("group");
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped.groups()[0].key(),
            &GroupKey::Composite(vec![Scalar::from("x|y"), Scalar::from("z")])
        );
    }

    #[test]
    fn numerically_equal_keys_share_a_group() {
        let table = LabeledTable::from_columns(vec![(
            "k",
            vec![Scalar::Float64(1.0), Scalar::Float64(2.0), Scalar::Float64(1.0)],
        )])
        .expect("table");
        let grouped = group_by(&table, &["k"]).expect("group");
        assert!(grouped.get(&[Scalar::Int64(1)]).is_some());
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn missing_keys_group_unless_dropped() {
        let table = LabeledTable::from_columns(vec![
            ("k", vec![Scalar::from("a"), Scalar::null(), Scalar::null()]),
            ("v", [1, 2, 3].map(Scalar::Int64).to_vec()),
        ])
        .expect("table");
        let kept = group_by(&table, &["k"]).expect("group");
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.groups()[1].len(), 2);
        let dropped =
            group_by_with_options(&table, &["k"], GroupByOptions { dropna: true }).expect("group");
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn aggregate_builds_keyed_table() {
        let grouped = group_by(&category_table(), &["category"]).expect("group");
        let sums = grouped.sum().expect("sum");
        assert_eq!(sums.index().labels(), &["A", "B"]);
        assert_eq!(sums.column_names(), &["category", "value"]);
        assert_eq!(
            sums.column_values("value").expect("value").values(),
            &[Scalar::Float64(9.0), Scalar::Float64(6.0)]
        );
        let counts = grouped.aggregate(AggFunc::Count).expect("count");
        assert_eq!(
            counts.column_values("value").expect("value").values(),
            &[Scalar::Int64(3), Scalar::Int64(2)]
        );
        let medians = grouped.aggregate(AggFunc::Median).expect("median");
        assert_eq!(
            medians.loc("A").expect("A").get("value"),
            Some(&Scalar::Float64(3.0))
        );
    }

    #[test]
    fn dispersion_aggregations_use_sample_denominator() {
        let grouped = group_by(&category_table(), &["category"]).expect("group");
        let column = |func: AggFunc| -> Vec<f64> {
            grouped
                .aggregate_column("value", func)
                .expect("aggregate")
                .values()
                .iter()
                .map(|v| v.as_number().unwrap_or(f64::NAN))
                .collect()
        };
        assert_eq!(column(AggFunc::Mean), vec![3.0, 3.0]);
        assert_eq!(column(AggFunc::Var), vec![4.0, 2.0]);
        assert_eq!(column(AggFunc::Std)[0], 2.0);
        assert!((column(AggFunc::Std)[1] - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(column(AggFunc::Min), vec![1.0, 2.0]);
        assert_eq!(column(AggFunc::Max), vec![5.0, 4.0]);

        let table = LabeledTable::from_columns(vec![
            ("k", ["x", "y", "x"].map(Scalar::from).to_vec()),
            ("v", [1.0, 2.0, 5.0].map(Scalar::Float64).to_vec()),
        ])
        .expect("table");
        let single = group_by(&table, &["k"])
            .expect("group")
            .aggregate_column("v", AggFunc::Var)
            .expect("var");
        assert_eq!(single.values()[0], Scalar::Float64(8.0));
        assert!(single.values()[1].is_missing());
    }

    #[test]
    fn numeric_aggregation_rejects_text_column() {
        let grouped = group_by(&category_table(), &["value"]).expect("group");
        let err = grouped
            .aggregate_column("category", AggFunc::Mean)
            .expect_err("text mean");
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        let firsts = grouped
            .aggregate_column("category", AggFunc::First)
            .expect("first");
        assert_eq!(firsts.len(), 5);
    }

    #[test]
    fn unknown_method_and_missing_column_fail() {
        let err = "mode".parse::<AggFunc>().expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnsupportedAggregationMethod);
        assert_eq!("Mean".parse::<AggFunc>().expect("mean"), AggFunc::Mean);

        let err = group_by(&category_table(), &["ghost"]).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert!(matches!(
            group_by(&category_table(), &[]),
            Err(GroupByError::NoKeys)
        ));
    }
}
