#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use lf_columnar::{Column, ColumnError};
use lf_index::{Index, IndexError};
use lf_types::{
    DType, ErrorKind, NullKind, Scalar, ScalarKey, collect_numbers, maximum, mean, minimum,
    percentile_linear, sample_std, variance,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("column '{name}' not found")]
    ColumnNotFound { name: String },
    #[error("column '{name}' already exists")]
    DuplicateColumn { name: String },
    #[error("{operation} requires numeric data, found dtype {dtype}")]
    UnsupportedType {
        operation: &'static str,
        dtype: DType,
    },
    #[error("{operation} is undefined on an empty collection")]
    EmptyCollection { operation: &'static str },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl FrameError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::ColumnNotFound { .. } => ErrorKind::ColumnNotFound,
            Self::DuplicateColumn { .. } | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::EmptyCollection { .. } => ErrorKind::EmptyCollection,
            Self::Column(err) => err.kind(),
            Self::Index(err) => err.kind(),
        }
    }
}

fn out_of_bounds(position: usize, len: usize) -> FrameError {
    FrameError::Index(IndexError::OutOfBounds { position, len })
}

/// Summary statistics for one numeric vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorSummary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

impl VectorSummary {
    pub const LABELS: [&'static str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

    /// Values in [`Self::LABELS`] order.
    #[must_use]
    pub fn to_array(&self) -> [f64; 8] {
        [
            self.count as f64,
            self.mean,
            self.std,
            self.min,
            self.q25,
            self.q50,
            self.q75,
            self.max,
        ]
    }
}

/// Average ranks (1-based) of `values`, ties sharing the mean of their
/// positions. Missing entries rank as NaN.
#[must_use]
pub fn average_ranks(values: &[Option<f64>]) -> Vec<f64> {
    let mut sortable: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|x| (i, x)))
        .collect();
    sortable.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut ranks = vec![f64::NAN; values.len()];
    let mut i = 0;
    while i < sortable.len() {
        let mut j = i + 1;
        while j < sortable.len() && sortable[j].1 == sortable[i].1 {
            j += 1;
        }
        // ranks i+1..=j averaged
        let avg = (i + 1 + j) as f64 / 2.0;
        for item in &sortable[i..j] {
            ranks[item.0] = avg;
        }
        i = j;
    }
    ranks
}

// ── LabeledVector ──────────────────────────────────────────────────────

/// One named column of cells with a parallel label sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledVector {
    name: String,
    index: Index,
    column: Column,
}

impl LabeledVector {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: column.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            index,
            column,
        })
    }

    /// Build a vector labelled `"0".."n-1"`.
    pub fn from_values(name: impl Into<String>, values: Vec<Scalar>) -> Result<Self, FrameError> {
        let index = Index::range(values.len());
        Self::new(name, index, Column::from_values(values)?)
    }

    /// Build a vector with explicit labels, rejecting a length mismatch
    /// before any value is inspected.
    pub fn with_labels(
        name: impl Into<String>,
        labels: Vec<String>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        if labels.len() != values.len() {
            return Err(FrameError::LengthMismatch {
                index_len: labels.len(),
                column_len: values.len(),
            });
        }
        Self::new(name, Index::new(labels), Column::from_values(values)?)
    }

    pub fn from_pairs(
        name: impl Into<String>,
        pairs: Vec<(String, Scalar)>,
    ) -> Result<Self, FrameError> {
        let (labels, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self::with_labels(name, labels, values)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn into_column(self) -> Column {
        self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        self.index.labels()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.column.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    #[must_use]
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Value under the first occurrence of `label`.
    pub fn loc(&self, label: &str) -> Result<&Scalar, FrameError> {
        let position = self.index.get_loc(label)?;
        Ok(&self.column.values()[position])
    }

    pub fn iloc(&self, position: usize) -> Result<&Scalar, FrameError> {
        self.column
            .value(position)
            .ok_or_else(|| out_of_bounds(position, self.len()))
    }

    /// `(label, value)` pairs in order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, Scalar)> {
        self.labels()
            .iter()
            .cloned()
            .zip(self.values().iter().cloned())
            .collect()
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        Self::new(
            self.name.clone(),
            self.index.take(positions)?,
            self.column.take(positions)?,
        )
    }

    // --- Numeric statistics ---

    /// Present numeric values, or `UnsupportedType` for text/bool vectors.
    pub fn numbers(&self, operation: &'static str) -> Result<Vec<f64>, FrameError> {
        if !self.column.is_numeric() {
            return Err(FrameError::UnsupportedType {
                operation,
                dtype: self.dtype(),
            });
        }
        Ok(collect_numbers(self.values()))
    }

    fn non_empty_numbers(&self, operation: &'static str) -> Result<Vec<f64>, FrameError> {
        let nums = self.numbers(operation)?;
        if nums.is_empty() {
            return Err(FrameError::EmptyCollection { operation });
        }
        Ok(nums)
    }

    /// Sum of present values; `0.0` when there are none.
    pub fn sum(&self) -> Result<f64, FrameError> {
        Ok(self.numbers("sum")?.iter().sum())
    }

    /// Mean of present values; NaN when there are none.
    pub fn mean(&self) -> Result<f64, FrameError> {
        Ok(mean(&self.numbers("mean")?))
    }

    /// Sample variance (n-1 denominator); NaN below two values.
    pub fn var(&self) -> Result<f64, FrameError> {
        Ok(variance(&self.numbers("var")?, 1))
    }

    /// Sample standard deviation (n-1 denominator).
    pub fn std(&self) -> Result<f64, FrameError> {
        Ok(sample_std(&self.numbers("std")?))
    }

    pub fn min(&self) -> Result<f64, FrameError> {
        Ok(minimum(&self.non_empty_numbers("min")?))
    }

    pub fn max(&self) -> Result<f64, FrameError> {
        Ok(maximum(&self.non_empty_numbers("max")?))
    }

    pub fn median(&self) -> Result<f64, FrameError> {
        self.quantile(0.5)
    }

    /// Linear-interpolation quantile, `q` in `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Result<f64, FrameError> {
        if !(0.0..=1.0).contains(&q) {
            return Err(FrameError::InvalidArgument(format!(
                "quantile must be between 0 and 1, got {q}"
            )));
        }
        let mut nums = self.non_empty_numbers("quantile")?;
        nums.sort_by(f64::total_cmp);
        Ok(percentile_linear(&nums, q))
    }

    /// Number of non-missing cells.
    #[must_use]
    pub fn count(&self) -> usize {
        self.column.count_valid()
    }

    pub fn describe(&self) -> Result<VectorSummary, FrameError> {
        let mut nums = self.non_empty_numbers("describe")?;
        nums.sort_by(f64::total_cmp);
        let count = nums.len();
        Ok(VectorSummary {
            count,
            mean: mean(&nums),
            std: sample_std(&nums),
            min: nums[0],
            q25: percentile_linear(&nums, 0.25),
            q50: percentile_linear(&nums, 0.5),
            q75: percentile_linear(&nums, 0.75),
            max: nums[count - 1],
        })
    }

    // --- Derivations ---

    /// Keep cells satisfying `predicate`, with their labels, in order.
    pub fn filter(&self, predicate: impl Fn(&Scalar) -> bool) -> Result<Self, FrameError> {
        self.filter_with_label(|_, value| predicate(value))
    }

    pub fn filter_with_label(
        &self,
        predicate: impl Fn(&str, &Scalar) -> bool,
    ) -> Result<Self, FrameError> {
        let positions: Vec<usize> = self
            .labels()
            .iter()
            .zip(self.values())
            .enumerate()
            .filter_map(|(i, (label, value))| predicate(label, value).then_some(i))
            .collect();
        self.take(&positions)
    }

    /// Apply `transform` to every cell, keeping labels 1:1.
    pub fn map(&self, transform: impl Fn(&Scalar) -> Scalar) -> Result<Self, FrameError> {
        let values = self.values().iter().map(transform).collect();
        Self::new(
            self.name.clone(),
            self.index.clone(),
            Column::from_values(values)?,
        )
    }

    /// Stable sort by value. Missing values lead when ascending and trail
    /// when descending.
    pub fn sort(&self, ascending: bool) -> Result<Self, FrameError> {
        self.sort_by(|left, right| {
            let ord = left.cmp_nulls_first(right);
            if ascending { ord } else { ord.reverse() }
        })
    }

    /// Stable sort with a caller comparator; equal cells keep their order.
    pub fn sort_by(
        &self,
        mut compare: impl FnMut(&Scalar, &Scalar) -> Ordering,
    ) -> Result<Self, FrameError> {
        let values = self.values();
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| compare(&values[a], &values[b]));
        self.take(&order)
    }

    /// Distinct values in first-seen order. All missing markers collapse
    /// into one entry.
    #[must_use]
    pub fn unique(&self) -> Vec<Scalar> {
        let mut seen = HashSet::<ScalarKey>::new();
        self.values()
            .iter()
            .filter(|value| seen.insert(value.to_key()))
            .cloned()
            .collect()
    }

    /// Occurrence count per distinct value, in first-seen order.
    #[must_use]
    pub fn value_counts(&self) -> Vec<(Scalar, usize)> {
        let mut slots = HashMap::<ScalarKey, usize>::new();
        let mut counts: Vec<(Scalar, usize)> = Vec::new();
        for value in self.values() {
            match slots.get(&value.to_key()) {
                Some(&slot) => counts[slot].1 += 1,
                None => {
                    slots.insert(value.to_key(), counts.len());
                    counts.push((value.clone(), 1));
                }
            }
        }
        counts
    }

    pub fn dropna(&self) -> Result<Self, FrameError> {
        self.filter(|value| !value.is_missing())
    }

    pub fn fillna(&self, value: &Scalar) -> Result<Self, FrameError> {
        Self::new(
            self.name.clone(),
            self.index.clone(),
            self.column.fillna(value)?,
        )
    }

    pub fn head(&self, n: usize) -> Result<Self, FrameError> {
        self.slice(0, n)
    }

    pub fn tail(&self, n: usize) -> Result<Self, FrameError> {
        self.slice(self.len().saturating_sub(n), n)
    }

    /// Rows `[start, start+len)`, truncated at the end.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self, FrameError> {
        let start = start.min(self.len());
        let end = start.saturating_add(len).min(self.len());
        let positions: Vec<usize> = (start..end).collect();
        self.take(&positions)
    }

    /// Move values `periods` rows down (negative: up), filling with NaN.
    pub fn shift(&self, periods: i64) -> Result<Self, FrameError> {
        let n = self.len();
        let values = self.values();
        let out = (0..n)
            .map(|i| {
                let source = if periods >= 0 {
                    i.checked_sub(periods.unsigned_abs() as usize)
                } else {
                    i.checked_add(periods.unsigned_abs() as usize)
                        .filter(|j| *j < n)
                };
                source.map_or(Scalar::Null(NullKind::NaN), |j| values[j].clone())
            })
            .collect();
        Self::new(
            self.name.clone(),
            self.index.clone(),
            Column::from_values(out)?,
        )
    }

    pub fn abs(&self) -> Result<Self, FrameError> {
        self.numbers("abs")?;
        self.map(|value| match value {
            Scalar::Int64(v) => v
                .checked_abs()
                .map_or(Scalar::Float64((*v as f64).abs()), Scalar::Int64),
            Scalar::Float64(v) => Scalar::Float64(v.abs()),
            other => other.clone(),
        })
    }

    /// Average rank of each value (1-based); missing cells rank as NaN.
    pub fn rank(&self) -> Result<Self, FrameError> {
        self.numbers("rank")?;
        let ranks = average_ranks(&self.column.numbers());
        let values = ranks.into_iter().map(Scalar::Float64).collect();
        Self::new(
            self.name.clone(),
            self.index.clone(),
            Column::new(DType::Float64, values)?,
        )
    }
}

// ── Record ─────────────────────────────────────────────────────────────

/// One materialized table row: column name to value, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Scalar)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    /// Set `name`, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Scalar) {
        let name = name.into();
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    #[must_use]
    pub fn into_fields(self) -> Vec<(String, Scalar)> {
        self.fields
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (key, value) in iter {
            record.insert(key, value.into());
        }
        record
    }
}

// ── LabeledTable ───────────────────────────────────────────────────────

/// Named columns sharing one row index, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledTable {
    index: Index,
    columns: BTreeMap<String, Column>,
    column_order: Vec<String>,
}

impl LabeledTable {
    /// Raw constructor over prebuilt columns.
    pub fn new(index: Index, columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let mut map = BTreeMap::new();
        let mut column_order = Vec::with_capacity(columns.len());
        for (name, column) in columns {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
            if map.contains_key(&name) {
                return Err(FrameError::DuplicateColumn { name });
            }
            column_order.push(name.clone());
            map.insert(name, column);
        }
        Ok(Self {
            index,
            columns: map,
            column_order,
        })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            index: Index::range(0),
            columns: BTreeMap::new(),
            column_order: Vec::new(),
        }
    }

    /// Build from column name/value pairs with a default `"0".."n-1"` index.
    pub fn from_columns<S: Into<String>>(data: Vec<(S, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let row_count = data.first().map_or(0, |(_, values)| values.len());
        Self::from_columns_with_index(data, Index::range(row_count).into_labels())
    }

    pub fn from_columns_with_index<S: Into<String>>(
        data: Vec<(S, Vec<Scalar>)>,
        labels: Vec<String>,
    ) -> Result<Self, FrameError> {
        // lengths first so a ragged input never reports a dtype error instead
        if let Some((_, values)) = data.iter().find(|(_, values)| values.len() != labels.len()) {
            return Err(FrameError::LengthMismatch {
                index_len: labels.len(),
                column_len: values.len(),
            });
        }
        let columns = data
            .into_iter()
            .map(|(name, values)| Ok((name.into(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(Index::new(labels), columns)
    }

    /// Build from row records, widening to the union of keys in first-seen
    /// order. Absent keys become null.
    pub fn from_records(records: &[Record]) -> Result<Self, FrameError> {
        let mut names: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key) {
                    names.push(key);
                }
            }
        }

        let data = names
            .iter()
            .map(|&name| {
                let values = records
                    .iter()
                    .map(|record| record.get(name).cloned().unwrap_or_else(Scalar::null))
                    .collect();
                (name.to_owned(), values)
            })
            .collect();
        let index = Index::range(records.len());
        Self::from_columns_with_index(data, index.into_labels())
    }

    /// Assemble vectors that already share one label sequence.
    pub fn from_vectors(vectors: Vec<LabeledVector>) -> Result<Self, FrameError> {
        let Some(first) = vectors.first() else {
            return Ok(Self::empty());
        };
        let index = first.index.clone();
        let columns = vectors
            .into_iter()
            .map(|vector| {
                if vector.index != index {
                    return Err(FrameError::InvalidArgument(format!(
                        "vector '{}' does not share the table index",
                        vector.name
                    )));
                }
                Ok((vector.name, vector.column))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(index, columns)
    }

    // --- Shape and access ---

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.column_order.len()
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Columns in table order.
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.column_order
            .iter()
            .filter_map(|name| self.columns.get(name).map(|col| (name.as_str(), col)))
    }

    pub fn column_values(&self, name: &str) -> Result<&Column, FrameError> {
        self.columns
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound {
                name: name.to_owned(),
            })
    }

    /// Column `name` as a standalone vector carrying the table index.
    pub fn column(&self, name: &str) -> Result<LabeledVector, FrameError> {
        let column = self.column_values(name)?;
        LabeledVector::new(name, self.index.clone(), column.clone())
    }

    /// Every column as a vector, in table order.
    pub fn column_vectors(&self) -> Result<Vec<LabeledVector>, FrameError> {
        self.column_order
            .iter()
            .map(|name| self.column(name))
            .collect()
    }

    fn ensure_columns(&self, names: &[&str]) -> Result<(), FrameError> {
        match names.iter().find(|name| !self.columns.contains_key(**name)) {
            Some(name) => Err(FrameError::ColumnNotFound {
                name: (*name).to_owned(),
            }),
            None => Ok(()),
        }
    }

    fn record_at(&self, position: usize) -> Record {
        let mut record = Record::new();
        for (name, column) in self.iter_columns() {
            let value = column
                .value(position)
                .cloned()
                .unwrap_or_else(Scalar::null);
            record.fields.push((name.to_owned(), value));
        }
        record
    }

    pub fn iloc(&self, position: usize) -> Result<Record, FrameError> {
        if position >= self.len() {
            return Err(out_of_bounds(position, self.len()));
        }
        Ok(self.record_at(position))
    }

    /// Row under the first occurrence of `label`.
    pub fn loc(&self, label: &str) -> Result<Record, FrameError> {
        let position = self.index.get_loc(label)?;
        Ok(self.record_at(position))
    }

    /// Rows as records, in index order.
    #[must_use]
    pub fn to_records(&self) -> Vec<Record> {
        (0..self.len()).map(|i| self.record_at(i)).collect()
    }

    #[must_use]
    pub fn to_columns(&self) -> Vec<(String, Vec<Scalar>)> {
        self.iter_columns()
            .map(|(name, column)| (name.to_owned(), column.values().to_vec()))
            .collect()
    }

    // --- Validated mutators ---

    fn check_len(&self, column: &Column) -> Result<(), FrameError> {
        if column.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                index_len: self.len(),
                column_len: column.len(),
            });
        }
        Ok(())
    }

    /// Add `name` at the end, or replace it in place.
    pub fn set_column(&mut self, name: impl Into<String>, column: Column) -> Result<(), FrameError> {
        self.check_len(&column)?;
        let name = name.into();
        if !self.columns.contains_key(&name) {
            self.column_order.push(name.clone());
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Insert a new column at `position` in the column order.
    pub fn insert_column(
        &mut self,
        position: usize,
        name: impl Into<String>,
        values: Vec<Scalar>,
    ) -> Result<(), FrameError> {
        let name = name.into();
        if position > self.column_order.len() {
            return Err(out_of_bounds(position, self.column_order.len()));
        }
        if self.columns.contains_key(&name) {
            return Err(FrameError::DuplicateColumn { name });
        }
        if values.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                index_len: self.len(),
                column_len: values.len(),
            });
        }
        let column = Column::from_values(values)?;
        self.column_order.insert(position, name.clone());
        self.columns.insert(name, column);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column, FrameError> {
        let column = self
            .columns
            .remove(name)
            .ok_or_else(|| FrameError::ColumnNotFound {
                name: name.to_owned(),
            })?;
        self.column_order.retain(|existing| existing != name);
        Ok(column)
    }

    pub fn rename_column(&mut self, from: &str, to: impl Into<String>) -> Result<(), FrameError> {
        let to = to.into();
        self.ensure_columns(&[from])?;
        if from == to {
            return Ok(());
        }
        if self.columns.contains_key(&to) {
            return Err(FrameError::DuplicateColumn { name: to });
        }
        if let Some(column) = self.columns.remove(from) {
            self.columns.insert(to.clone(), column);
        }
        for existing in &mut self.column_order {
            if existing == from {
                existing.clone_from(&to);
            }
        }
        Ok(())
    }

    /// Pure variant of [`Self::set_column`].
    pub fn with_column(&self, name: impl Into<String>, column: Column) -> Result<Self, FrameError> {
        let mut out = self.clone();
        out.set_column(name, column)?;
        Ok(out)
    }

    // --- Relational operators ---

    /// Rows at `positions`, in the given order, keeping their labels.
    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let index = self.index.take(positions)?;
        let columns = self
            .iter_columns()
            .map(|(name, column)| Ok((name.to_owned(), column.take(positions)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(index, columns)
    }

    pub fn slice(&self, start: usize, len: usize) -> Result<Self, FrameError> {
        let start = start.min(self.len());
        let end = start.saturating_add(len).min(self.len());
        let positions: Vec<usize> = (start..end).collect();
        self.take(&positions)
    }

    pub fn head(&self, n: usize) -> Result<Self, FrameError> {
        self.slice(0, n)
    }

    pub fn tail(&self, n: usize) -> Result<Self, FrameError> {
        self.slice(self.len().saturating_sub(n), n)
    }

    /// Keep rows whose record satisfies `predicate`, in order.
    pub fn filter(&self, predicate: impl Fn(&Record) -> bool) -> Result<Self, FrameError> {
        let positions: Vec<usize> = (0..self.len())
            .filter(|&i| predicate(&self.record_at(i)))
            .collect();
        self.take(&positions)
    }

    pub fn select(&self, names: &[&str]) -> Result<Self, FrameError> {
        self.ensure_columns(names)?;
        let columns = names
            .iter()
            .map(|&name| Ok((name.to_owned(), self.column_values(name)?.clone())))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(self.index.clone(), columns)
    }

    /// Sort on `columns` left to right, all in one direction.
    pub fn sort_by(&self, columns: &[&str], ascending: bool) -> Result<Self, FrameError> {
        let keys: Vec<(&str, bool)> = columns.iter().map(|&name| (name, ascending)).collect();
        self.sort_by_keys(&keys)
    }

    /// Stable lexicographic sort with a direction per key. Missing values
    /// lead an ascending key and trail a descending one.
    pub fn sort_by_keys(&self, keys: &[(&str, bool)]) -> Result<Self, FrameError> {
        let key_columns = keys
            .iter()
            .map(|&(name, ascending)| Ok((self.column_values(name)?.values(), ascending)))
            .collect::<Result<Vec<_>, FrameError>>()?;

        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            for (values, ascending) in &key_columns {
                let ord = values[a].cmp_nulls_first(&values[b]);
                let ord = if *ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        self.take(&order)
    }

    /// Drop rows holding a missing value in any of `subset` (default: all
    /// columns).
    pub fn dropna(&self, subset: Option<&[&str]>) -> Result<Self, FrameError> {
        let checked = self.resolve_subset(subset)?;
        let positions: Vec<usize> = (0..self.len())
            .filter(|&i| {
                checked
                    .iter()
                    .all(|column| column.value(i).is_some_and(|v| !v.is_missing()))
            })
            .collect();
        self.take(&positions)
    }

    /// Substitute `value` for missing cells in `subset` (default: all
    /// columns).
    pub fn fillna(&self, value: &Scalar, subset: Option<&[&str]>) -> Result<Self, FrameError> {
        if let Some(names) = subset {
            self.ensure_columns(names)?;
        }
        let columns = self
            .iter_columns()
            .map(|(name, column)| {
                let selected = subset.is_none_or(|names| names.contains(&name));
                let out = if selected {
                    column.fillna(value)?
                } else {
                    column.clone()
                };
                Ok((name.to_owned(), out))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(self.index.clone(), columns)
    }

    fn resolve_subset(&self, subset: Option<&[&str]>) -> Result<Vec<&Column>, FrameError> {
        match subset {
            Some(names) => names.iter().map(|name| self.column_values(name)).collect(),
            None => Ok(self.iter_columns().map(|(_, column)| column).collect()),
        }
    }

    /// Summary per numeric column, indexed by
    /// `count, mean, std, min, 25%, 50%, 75%, max`. Other columns are skipped.
    pub fn describe(&self) -> Result<Self, FrameError> {
        let index: Index = VectorSummary::LABELS.into_iter().collect();
        let mut columns = Vec::new();
        for (name, column) in self.iter_columns() {
            if !column.dtype().is_numeric() {
                continue;
            }
            let vector = LabeledVector::new(name, self.index.clone(), column.clone())?;
            let summary = match vector.describe() {
                Ok(summary) => summary.to_array(),
                Err(FrameError::EmptyCollection { .. }) => {
                    [0.0, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN]
                }
                Err(err) => return Err(err),
            };
            let values = summary.into_iter().map(Scalar::Float64).collect();
            columns.push((name.to_owned(), Column::new(DType::Float64, values)?));
        }
        Self::new(index, columns)
    }
}

#[cfg(test)]
mod tests {
    use lf_columnar::Column;
    use lf_types::{DType, ErrorKind, Scalar};

    use super::{FrameError, LabeledTable, LabeledVector, Record, average_ranks};

    fn ints(values: &[i64]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::Int64).collect()
    }

    fn strs(values: &[&str]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::from).collect()
    }

    fn sample_table() -> LabeledTable {
        LabeledTable::from_columns(vec![
            ("name", strs(&["c", "a", "b", "a"])),
            ("score", ints(&[3, 1, 2, 5])),
        ])
        .expect("table")
    }

    #[test]
    fn vector_stats_on_one_to_five() {
        let v = LabeledVector::from_values("v", ints(&[1, 2, 3, 4, 5])).expect("vector");
        assert_eq!(v.sum().expect("sum"), 15.0);
        assert_eq!(v.mean().expect("mean"), 3.0);
        assert!((v.std().expect("std") - 1.581_138_830_084_19).abs() < 1e-9);
        assert_eq!(v.min().expect("min"), 1.0);
        assert_eq!(v.max().expect("max"), 5.0);
        assert_eq!(v.median().expect("median"), 3.0);
    }

    #[test]
    fn vector_rejects_label_length_mismatch() {
        let err = LabeledVector::with_labels("v", vec!["a".into()], ints(&[1, 2]))
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::LengthMismatch);
    }

    #[test]
    fn default_labels_are_positions() {
        let v = LabeledVector::from_values("v", ints(&[7, 8])).expect("vector");
        assert_eq!(v.labels(), &["0", "1"]);
        assert_eq!(v.loc("1").expect("loc"), &Scalar::Int64(8));
        assert_eq!(v.iloc(0).expect("iloc"), &Scalar::Int64(7));
    }

    #[test]
    fn loc_returns_first_duplicate_and_fails_on_missing() {
        let v = LabeledVector::with_labels(
            "v",
            vec!["x".into(), "y".into(), "x".into()],
            ints(&[1, 2, 3]),
        )
        .expect("vector");
        assert_eq!(v.loc("x").expect("loc"), &Scalar::Int64(1));
        assert_eq!(
            v.loc("z").expect_err("absent").kind(),
            ErrorKind::LabelNotFound
        );
        assert_eq!(
            v.iloc(3).expect_err("out of range").kind(),
            ErrorKind::IndexOutOfRange
        );
    }

    #[test]
    fn numeric_stats_reject_text() {
        let v = LabeledVector::from_values("v", strs(&["a", "b"])).expect("vector");
        let err = v.sum().expect_err("text sum");
        assert!(matches!(err, FrameError::UnsupportedType { operation: "sum", dtype: DType::Utf8 }));
    }

    #[test]
    fn min_max_describe_reject_empty() {
        let v = LabeledVector::from_values("v", Vec::new()).expect("vector");
        assert_eq!(v.min().expect_err("min").kind(), ErrorKind::EmptyCollection);
        assert_eq!(v.max().expect_err("max").kind(), ErrorKind::EmptyCollection);
        assert_eq!(
            v.describe().expect_err("describe").kind(),
            ErrorKind::EmptyCollection
        );
        assert_eq!(v.sum().expect("sum of nothing"), 0.0);
    }

    #[test]
    fn describe_reports_quartiles() {
        let v = LabeledVector::from_values("v", ints(&[1, 2, 3, 4, 5])).expect("vector");
        let summary = v.describe().expect("describe");
        assert_eq!(summary.count, 5);
        assert_eq!(summary.q25, 2.0);
        assert_eq!(summary.q50, 3.0);
        assert_eq!(summary.q75, 4.0);
        assert_eq!(summary.max, 5.0);
    }

    #[test]
    fn quantile_rejects_out_of_range() {
        let v = LabeledVector::from_values("v", ints(&[1, 2])).expect("vector");
        assert_eq!(
            v.quantile(1.5).expect_err("bad q").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(v.quantile(0.25).expect("q"), 1.25);
    }

    #[test]
    fn filter_keeps_labels_and_order() {
        let v = LabeledVector::from_values("v", ints(&[5, 1, 4, 2])).expect("vector");
        let out = v
            .filter(|value| value.as_number().is_some_and(|x| x > 1.5))
            .expect("filter");
        assert_eq!(out.labels(), &["0", "2", "3"]);
        assert_eq!(out.values(), ints(&[5, 4, 2]).as_slice());
    }

    #[test]
    fn map_preserves_labels() {
        let v = LabeledVector::with_labels("v", vec!["a".into(), "b".into()], ints(&[1, 2]))
            .expect("vector");
        let out = v
            .map(|value| Scalar::Int64(value.as_number().unwrap_or(0.0) as i64 * 10))
            .expect("map");
        assert_eq!(out.labels(), &["a", "b"]);
        assert_eq!(out.values(), ints(&[10, 20]).as_slice());
    }

    #[test]
    fn sort_is_stable_with_nulls_first() {
        let v = LabeledVector::from_values(
            "v",
            vec![
                Scalar::Int64(2),
                Scalar::null(),
                Scalar::Int64(1),
                Scalar::Int64(2),
            ],
        )
        .expect("vector");
        let asc = v.sort(true).expect("sort");
        assert_eq!(asc.labels(), &["1", "2", "0", "3"]);
        let desc = v.sort(false).expect("sort");
        assert_eq!(desc.labels(), &["0", "3", "2", "1"]);
    }

    #[test]
    fn unique_and_value_counts_follow_first_occurrence() {
        let v = LabeledVector::from_values("v", strs(&["b", "a", "b", "c", "a", "b"]))
            .expect("vector");
        assert_eq!(v.unique(), strs(&["b", "a", "c"]));
        assert_eq!(
            v.value_counts(),
            vec![
                (Scalar::from("b"), 3),
                (Scalar::from("a"), 2),
                (Scalar::from("c"), 1)
            ]
        );
    }

    #[test]
    fn dropna_and_fillna() {
        let v = LabeledVector::from_values(
            "v",
            vec![Scalar::Float64(1.0), Scalar::null(), Scalar::Float64(3.0)],
        )
        .expect("vector");
        assert_eq!(v.dropna().expect("dropna").labels(), &["0", "2"]);
        let filled = v.fillna(&Scalar::Float64(0.0)).expect("fillna");
        assert_eq!(filled.values()[1], Scalar::Float64(0.0));
        assert_eq!(v.count(), 2);
    }

    #[test]
    fn shift_head_tail() {
        let v = LabeledVector::from_values("v", ints(&[1, 2, 3])).expect("vector");
        let shifted = v.shift(1).expect("shift");
        assert!(shifted.values()[0].is_missing());
        assert_eq!(shifted.values()[2], Scalar::Int64(2));
        let up = v.shift(-1).expect("shift");
        assert!(up.values()[2].is_missing());
        assert_eq!(v.head(2).expect("head").labels(), &["0", "1"]);
        assert_eq!(v.tail(2).expect("tail").labels(), &["1", "2"]);
        assert_eq!(v.tail(10).expect("tail").len(), 3);
    }

    #[test]
    fn rank_averages_ties() {
        assert_eq!(
            average_ranks(&[Some(10.0), Some(20.0), Some(10.0), None])[..3],
            [1.5, 3.0, 1.5]
        );
        let v = LabeledVector::from_values("v", ints(&[3, -1])).expect("vector");
        assert_eq!(v.rank().expect("rank").values()[0], Scalar::Float64(2.0));
        assert_eq!(v.abs().expect("abs").values()[1], Scalar::Int64(1));
    }

    #[test]
    fn table_requires_equal_lengths() {
        let err = LabeledTable::from_columns(vec![("a", ints(&[1, 2])), ("b", ints(&[1]))])
            .expect_err("ragged");
        assert_eq!(err.kind(), ErrorKind::LengthMismatch);
    }

    #[test]
    fn table_keeps_insertion_order() {
        let table = LabeledTable::from_columns(vec![("z", ints(&[1])), ("a", ints(&[2]))])
            .expect("table");
        assert_eq!(table.column_names(), &["z", "a"]);
        assert_eq!(table.index().labels(), &["0"]);
    }

    #[test]
    fn records_widen_to_union_of_keys() {
        let records = vec![
            Record::from_iter([("a", Scalar::Int64(1))]),
            Record::from_iter([("b", Scalar::from("x")), ("a", Scalar::Int64(2))]),
        ];
        let table = LabeledTable::from_records(&records).expect("table");
        assert_eq!(table.column_names(), &["a", "b"]);
        assert!(table.column_values("b").expect("b").values()[0].is_missing());

        let round_trip = LabeledTable::from_records(&table.to_records()).expect("round trip");
        assert_eq!(round_trip.to_columns(), table.to_columns());
    }

    #[test]
    fn column_and_row_access_errors() {
        let table = sample_table();
        assert_eq!(
            table.column("nope").expect_err("missing").kind(),
            ErrorKind::ColumnNotFound
        );
        assert_eq!(
            table.iloc(9).expect_err("oob").kind(),
            ErrorKind::IndexOutOfRange
        );
        assert_eq!(
            table.loc("x").expect_err("label").kind(),
            ErrorKind::LabelNotFound
        );
        let row = table.loc("1").expect("row");
        assert_eq!(row.get("name"), Some(&Scalar::from("a")));
    }

    #[test]
    fn mutators_validate_before_mutating() {
        let mut table = sample_table();
        let before = table.clone();
        let short = Column::from_values(ints(&[1])).expect("column");
        assert!(table.set_column("extra", short).is_err());
        assert!(table.insert_column(0, "score", ints(&[0, 0, 0, 0])).is_err());
        assert!(table.rename_column("name", "score").is_err());
        assert!(table.remove_column("ghost").is_err());
        assert_eq!(table, before);

        table
            .insert_column(0, "id", ints(&[10, 11, 12, 13]))
            .expect("insert");
        table.rename_column("score", "points").expect("rename");
        let removed = table.remove_column("name").expect("remove");
        assert_eq!(removed.len(), 4);
        assert_eq!(table.column_names(), &["id", "points"]);
    }

    #[test]
    fn filter_receives_records() {
        let table = sample_table();
        let out = table
            .filter(|row| row.get("name") == Some(&Scalar::from("a")))
            .expect("filter");
        assert_eq!(out.index().labels(), &["1", "3"]);
    }

    #[test]
    fn sort_by_multiple_keys() {
        let table = sample_table();
        let out = table
            .sort_by_keys(&[("name", true), ("score", false)])
            .expect("sort");
        assert_eq!(out.index().labels(), &["3", "1", "2", "0"]);
        let desc = table.sort_by(&["score"], false).expect("sort");
        assert_eq!(
            desc.column_values("score").expect("score").values(),
            ints(&[5, 3, 2, 1]).as_slice()
        );
        assert_eq!(
            table.sort_by(&["ghost"], true).expect_err("missing").kind(),
            ErrorKind::ColumnNotFound
        );
    }

    #[test]
    fn select_head_tail() {
        let table = sample_table();
        let out = table.select(&["score"]).expect("select");
        assert_eq!(out.column_names(), &["score"]);
        assert_eq!(table.head(2).expect("head").index().labels(), &["0", "1"]);
        assert_eq!(table.tail(1).expect("tail").index().labels(), &["3"]);
    }

    #[test]
    fn dropna_and_fillna_respect_subset() {
        let table = LabeledTable::from_columns(vec![
            ("a", vec![Scalar::Int64(1), Scalar::null(), Scalar::Int64(3)]),
            ("b", vec![Scalar::null(), Scalar::Int64(2), Scalar::Int64(3)]),
        ])
        .expect("table");
        assert_eq!(table.dropna(None).expect("dropna").len(), 1);
        assert_eq!(table.dropna(Some(&["a"])).expect("dropna").len(), 2);
        let filled = table
            .fillna(&Scalar::Int64(0), Some(&["b"]))
            .expect("fillna");
        assert_eq!(filled.column_values("b").expect("b").values()[0], Scalar::Int64(0));
        assert!(filled.column_values("a").expect("a").values()[1].is_missing());
    }

    #[test]
    fn describe_skips_text_columns() {
        let table = sample_table();
        let summary = table.describe().expect("describe");
        assert_eq!(summary.column_names(), &["score"]);
        assert_eq!(summary.len(), 8);
        let count = summary.loc("count").expect("count row");
        assert_eq!(count.get("score"), Some(&Scalar::Float64(4.0)));
    }
}
