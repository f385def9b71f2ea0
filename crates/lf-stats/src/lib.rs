#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use lf_columnar::{ArithmeticOp, Column, ColumnError};
use lf_frame::{FrameError, LabeledTable, LabeledVector, average_ranks};
use lf_index::Index;
use lf_types::{DType, ErrorKind, Scalar, maximum, mean, minimum, sample_std};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("unsupported correlation method '{method}' (expected pearson or spearman)")]
    UnsupportedMethod { method: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{operation} requires a numeric column, '{column}' has dtype {dtype}")]
    UnsupportedType {
        operation: &'static str,
        column: String,
        dtype: DType,
    },
    #[error("{operation} found no numeric columns")]
    NoNumericColumns { operation: &'static str },
    #[error("row count mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl StatsError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedMethod { .. } => ErrorKind::UnsupportedAggregationMethod,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::NoNumericColumns { .. } => ErrorKind::EmptyCollection,
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

// ── Element-wise arithmetic ────────────────────────────────────────────

/// Right-hand side of a table arithmetic operation.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Table(&'a LabeledTable),
    Scalar(&'a Scalar),
}

impl<'a> From<&'a LabeledTable> for Operand<'a> {
    fn from(table: &'a LabeledTable) -> Self {
        Self::Table(table)
    }
}

impl<'a> From<&'a Scalar> for Operand<'a> {
    fn from(value: &'a Scalar) -> Self {
        Self::Scalar(value)
    }
}

/// Apply `op` cell by cell.
///
/// Against a table, only columns present in both are combined, aligned by
/// position; the row counts must agree and the left index is kept. Against
/// a scalar, every column is broadcast. Non-numeric cells come out null.
pub fn arithmetic(
    table: &LabeledTable,
    rhs: Operand<'_>,
    op: ArithmeticOp,
) -> Result<LabeledTable, StatsError> {
    let columns = match rhs {
        Operand::Table(other) => {
            if other.len() != table.len() {
                return Err(StatsError::LengthMismatch {
                    left: table.len(),
                    right: other.len(),
                });
            }
            let mut columns = Vec::new();
            for (name, column) in table.iter_columns() {
                if let Ok(right) = other.column_values(name) {
                    columns.push((name.to_owned(), column.binary_numeric(right, op)?));
                }
            }
            columns
        }
        Operand::Scalar(value) => table
            .iter_columns()
            .map(|(name, column)| Ok((name.to_owned(), column.scalar_numeric(value, op)?)))
            .collect::<Result<Vec<_>, StatsError>>()?,
    };
    Ok(LabeledTable::new(table.index().clone(), columns)?)
}

pub fn add<'a>(table: &LabeledTable, rhs: impl Into<Operand<'a>>) -> Result<LabeledTable, StatsError> {
    arithmetic(table, rhs.into(), ArithmeticOp::Add)
}

pub fn subtract<'a>(
    table: &LabeledTable,
    rhs: impl Into<Operand<'a>>,
) -> Result<LabeledTable, StatsError> {
    arithmetic(table, rhs.into(), ArithmeticOp::Sub)
}

pub fn multiply<'a>(
    table: &LabeledTable,
    rhs: impl Into<Operand<'a>>,
) -> Result<LabeledTable, StatsError> {
    arithmetic(table, rhs.into(), ArithmeticOp::Mul)
}

pub fn divide<'a>(
    table: &LabeledTable,
    rhs: impl Into<Operand<'a>>,
) -> Result<LabeledTable, StatsError> {
    arithmetic(table, rhs.into(), ArithmeticOp::Div)
}

pub fn power<'a>(
    table: &LabeledTable,
    rhs: impl Into<Operand<'a>>,
) -> Result<LabeledTable, StatsError> {
    arithmetic(table, rhs.into(), ArithmeticOp::Pow)
}

// ── Numeric column transforms ──────────────────────────────────────────

fn floats_column(values: Vec<f64>) -> Result<Column, ColumnError> {
    Column::new(DType::Float64, values.into_iter().map(Scalar::Float64).collect())
}

/// Rebuild `table` from `transform` over each numeric column. Text, bool
/// and all-null columns are left out of the result.
fn map_numeric_columns(
    table: &LabeledTable,
    transform: impl Fn(&[Option<f64>]) -> Vec<f64>,
) -> Result<LabeledTable, StatsError> {
    let columns = table
        .iter_columns()
        .filter(|(_, column)| column.dtype().is_numeric())
        .map(|(name, column)| Ok((name.to_owned(), floats_column(transform(&column.numbers()))?)))
        .collect::<Result<Vec<_>, StatsError>>()?;
    Ok(LabeledTable::new(table.index().clone(), columns)?)
}

fn map_vector(
    vector: &LabeledVector,
    operation: &'static str,
    transform: impl Fn(&[Option<f64>]) -> Vec<f64>,
) -> Result<LabeledVector, StatsError> {
    if !vector.column().is_numeric() {
        return Err(StatsError::UnsupportedType {
            operation,
            column: vector.name().to_owned(),
            dtype: vector.dtype(),
        });
    }
    let column = floats_column(transform(&vector.column().numbers()))?;
    Ok(LabeledVector::new(
        vector.name(),
        vector.index().clone(),
        column,
    )?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingStat {
    Mean,
    Sum,
    Std,
    Min,
    Max,
}

impl RollingStat {
    fn reduce(self, window: &[f64]) -> f64 {
        match self {
            Self::Sum => window.iter().sum(),
            Self::Mean => mean(window),
            Self::Std => sample_std(window),
            Self::Min => minimum(window),
            Self::Max => maximum(window),
        }
    }
}

/// Trailing-window statistic. Positions before the first full window, and
/// windows holding a missing value, yield NaN.
pub fn rolling_values(
    values: &[Option<f64>],
    window: usize,
    stat: RollingStat,
) -> Result<Vec<f64>, StatsError> {
    if window == 0 {
        return Err(StatsError::InvalidArgument(
            "rolling window must be at least 1".to_owned(),
        ));
    }
    let mut buffer = Vec::with_capacity(window);
    let out = (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return f64::NAN;
            }
            buffer.clear();
            buffer.extend(values[i + 1 - window..=i].iter().flatten());
            if buffer.len() < window {
                f64::NAN
            } else {
                stat.reduce(&buffer)
            }
        })
        .collect();
    Ok(out)
}

pub fn rolling(
    table: &LabeledTable,
    window: usize,
    stat: RollingStat,
) -> Result<LabeledTable, StatsError> {
    // validate once so an all-text table still reports the bad window
    rolling_values(&[], window, stat)?;
    map_numeric_columns(table, |values| {
        rolling_values(values, window, stat).unwrap_or_default()
    })
}

pub fn rolling_vector(
    vector: &LabeledVector,
    window: usize,
    stat: RollingStat,
) -> Result<LabeledVector, StatsError> {
    rolling_values(&[], window, stat)?;
    map_vector(vector, "rolling", |values| {
        rolling_values(values, window, stat).unwrap_or_default()
    })
}

pub fn rolling_mean(table: &LabeledTable, window: usize) -> Result<LabeledTable, StatsError> {
    rolling(table, window, RollingStat::Mean)
}

pub fn rolling_sum(table: &LabeledTable, window: usize) -> Result<LabeledTable, StatsError> {
    rolling(table, window, RollingStat::Sum)
}

pub fn rolling_std(table: &LabeledTable, window: usize) -> Result<LabeledTable, StatsError> {
    rolling(table, window, RollingStat::Std)
}

pub fn rolling_min(table: &LabeledTable, window: usize) -> Result<LabeledTable, StatsError> {
    rolling(table, window, RollingStat::Min)
}

pub fn rolling_max(table: &LabeledTable, window: usize) -> Result<LabeledTable, StatsError> {
    rolling(table, window, RollingStat::Max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CumulativeStat {
    Sum,
    Prod,
    Min,
    Max,
}

/// Running accumulation from the first row. Missing cells stay NaN and do
/// not reset the accumulator.
#[must_use]
pub fn cumulative_values(values: &[Option<f64>], stat: CumulativeStat) -> Vec<f64> {
    let mut acc: Option<f64> = None;
    values
        .iter()
        .map(|value| match value {
            Some(x) => {
                let next = match (acc, stat) {
                    (None, _) => *x,
                    (Some(a), CumulativeStat::Sum) => a + x,
                    (Some(a), CumulativeStat::Prod) => a * x,
                    (Some(a), CumulativeStat::Min) => a.min(*x),
                    (Some(a), CumulativeStat::Max) => a.max(*x),
                };
                acc = Some(next);
                next
            }
            None => f64::NAN,
        })
        .collect()
}

pub fn cumulative(table: &LabeledTable, stat: CumulativeStat) -> Result<LabeledTable, StatsError> {
    map_numeric_columns(table, |values| cumulative_values(values, stat))
}

pub fn cumulative_vector(
    vector: &LabeledVector,
    stat: CumulativeStat,
) -> Result<LabeledVector, StatsError> {
    map_vector(vector, "cumulative", |values| cumulative_values(values, stat))
}

pub fn cum_sum(table: &LabeledTable) -> Result<LabeledTable, StatsError> {
    cumulative(table, CumulativeStat::Sum)
}

pub fn cum_prod(table: &LabeledTable) -> Result<LabeledTable, StatsError> {
    cumulative(table, CumulativeStat::Prod)
}

pub fn cum_min(table: &LabeledTable) -> Result<LabeledTable, StatsError> {
    cumulative(table, CumulativeStat::Min)
}

pub fn cum_max(table: &LabeledTable) -> Result<LabeledTable, StatsError> {
    cumulative(table, CumulativeStat::Max)
}

fn lagged(values: &[Option<f64>], periods: usize, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let previous = i.checked_sub(periods).and_then(|j| values[j]);
            match (values[i], previous) {
                (Some(current), Some(previous)) => f(current, previous),
                _ => f64::NAN,
            }
        })
        .collect()
}

/// `(x[i] - x[i-periods]) / x[i-periods]`; the first `periods` rows are NaN.
pub fn pct_change(table: &LabeledTable, periods: usize) -> Result<LabeledTable, StatsError> {
    map_numeric_columns(table, |values| {
        lagged(values, periods, |current, previous| (current - previous) / previous)
    })
}

/// `x[i] - x[i-periods]`; the first `periods` rows are NaN.
pub fn diff(table: &LabeledTable, periods: usize) -> Result<LabeledTable, StatsError> {
    map_numeric_columns(table, |values| {
        lagged(values, periods, |current, previous| current - previous)
    })
}

/// Clamp every numeric cell into `[lower, upper]`; either bound may be open.
pub fn clip(
    table: &LabeledTable,
    lower: Option<f64>,
    upper: Option<f64>,
) -> Result<LabeledTable, StatsError> {
    if let (Some(lo), Some(hi)) = (lower, upper)
        && lo > hi
    {
        return Err(StatsError::InvalidArgument(format!(
            "clip lower bound {lo} exceeds upper bound {hi}"
        )));
    }
    map_numeric_columns(table, |values| {
        values
            .iter()
            .map(|value| match value {
                Some(x) => {
                    let x = lower.map_or(*x, |lo| x.max(lo));
                    upper.map_or(x, |hi| x.min(hi))
                }
                None => f64::NAN,
            })
            .collect()
    })
}

/// Round half away from zero to `decimals` places (negative: tens, hundreds).
pub fn round(table: &LabeledTable, decimals: i32) -> Result<LabeledTable, StatsError> {
    map_numeric_columns(table, |values| {
        values
            .iter()
            .map(|value| value.map_or(f64::NAN, |x| round_to(x, decimals)))
            .collect()
    })
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    if factor == 0.0 {
        // 10^decimals underflowed: every finite value rounds to zero
        return if x.is_finite() { 0.0_f64.copysign(x) } else { x };
    }
    if !factor.is_finite() {
        return x;
    }
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / factor
}

pub fn abs(table: &LabeledTable) -> Result<LabeledTable, StatsError> {
    map_numeric_columns(table, |values| {
        values
            .iter()
            .map(|value| value.map_or(f64::NAN, f64::abs))
            .collect()
    })
}

// ── Correlation and covariance ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
        })
    }
}

impl FromStr for CorrelationMethod {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pearson" => Ok(Self::Pearson),
            "spearman" => Ok(Self::Spearman),
            _ => Err(StatsError::UnsupportedMethod {
                method: s.to_owned(),
            }),
        }
    }
}

/// Rows where both sides are present.
fn complete_pairs(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip()
}

/// Sample covariance (n-1); NaN below two points.
#[must_use]
pub fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = mean(&x[..n]);
    let mean_y = mean(&y[..n]);
    x[..n]
        .iter()
        .zip(&y[..n])
        .map(|(a, b)| (a - mean_x) * (b - mean_y))
        .sum::<f64>()
        / (n - 1) as f64
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
}

/// Pearson coefficient; NaN when either side is constant.
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    let (x, y) = (&x[..n], &y[..n]);
    if n < 2 || is_constant(x) || is_constant(y) {
        return f64::NAN;
    }
    let sd_x = sample_covariance(x, x).sqrt();
    let sd_y = sample_covariance(y, y).sqrt();
    if !(sd_x > 0.0 && sd_y > 0.0 && sd_x.is_finite() && sd_y.is_finite()) {
        return f64::NAN;
    }
    (sample_covariance(x, y) / sd_x / sd_y).clamp(-1.0, 1.0)
}

/// Pearson on average ranks.
#[must_use]
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let rx = average_ranks(&x.iter().copied().map(Some).collect::<Vec<_>>());
    let ry = average_ranks(&y.iter().copied().map(Some).collect::<Vec<_>>());
    pearson(&rx, &ry)
}

fn correlate(x: &[Option<f64>], y: &[Option<f64>], method: CorrelationMethod) -> f64 {
    let (x, y) = complete_pairs(x, y);
    match method {
        CorrelationMethod::Pearson => pearson(&x, &y),
        CorrelationMethod::Spearman => spearman(&x, &y),
    }
}

fn covary(x: &[Option<f64>], y: &[Option<f64>]) -> f64 {
    let (x, y) = complete_pairs(x, y);
    sample_covariance(&x, &y)
}

fn numeric_column<'a>(
    table: &'a LabeledTable,
    name: &str,
    operation: &'static str,
) -> Result<&'a Column, StatsError> {
    let column = table.column_values(name)?;
    if !column.dtype().is_numeric() {
        return Err(StatsError::UnsupportedType {
            operation,
            column: name.to_owned(),
            dtype: column.dtype(),
        });
    }
    Ok(column)
}

/// Correlation between two named columns over their complete rows.
pub fn correlation(
    table: &LabeledTable,
    a: &str,
    b: &str,
    method: CorrelationMethod,
) -> Result<f64, StatsError> {
    let x = numeric_column(table, a, "correlation")?;
    let y = numeric_column(table, b, "correlation")?;
    Ok(correlate(&x.numbers(), &y.numbers(), method))
}

pub fn covariance(table: &LabeledTable, a: &str, b: &str) -> Result<f64, StatsError> {
    let x = numeric_column(table, a, "covariance")?;
    let y = numeric_column(table, b, "covariance")?;
    Ok(covary(&x.numbers(), &y.numbers()))
}

/// Columns whose first present value is a number.
fn detect_numeric_columns(table: &LabeledTable) -> Vec<(&str, Vec<Option<f64>>)> {
    table
        .iter_columns()
        .filter(|(_, column)| {
            column
                .values()
                .iter()
                .find(|value| !value.is_missing())
                .is_some_and(Scalar::is_numeric)
        })
        .map(|(name, column)| (name, column.numbers()))
        .collect()
}

fn square_matrix(
    table: &LabeledTable,
    operation: &'static str,
    stat: impl Fn(&[Option<f64>], &[Option<f64>]) -> f64,
) -> Result<LabeledTable, StatsError> {
    let numeric = detect_numeric_columns(table);
    if numeric.is_empty() {
        return Err(StatsError::NoNumericColumns { operation });
    }
    let index: Index = numeric.iter().map(|(name, _)| *name).collect();
    let columns = numeric
        .iter()
        .map(|(name, y)| {
            let values = numeric.iter().map(|(_, x)| stat(x, y)).collect();
            Ok(((*name).to_owned(), floats_column(values)?))
        })
        .collect::<Result<Vec<_>, StatsError>>()?;
    debug!(columns = numeric.len(), "computed {operation} matrix");
    Ok(LabeledTable::new(index, columns)?)
}

/// Pairwise correlation of every numeric column, indexed by column name on
/// both axes.
#[instrument(skip_all, fields(rows = table.len(), columns = table.num_columns(), method = %method))]
pub fn corr_matrix(
    table: &LabeledTable,
    method: CorrelationMethod,
) -> Result<LabeledTable, StatsError> {
    square_matrix(table, "correlation", |x, y| correlate(x, y, method))
}

/// Pairwise sample covariance of every numeric column.
#[instrument(skip_all, fields(rows = table.len(), columns = table.num_columns()))]
pub fn cov_matrix(table: &LabeledTable) -> Result<LabeledTable, StatsError> {
    square_matrix(table, "covariance", covary)
}
