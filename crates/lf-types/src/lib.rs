#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    /// `true` for the dtypes statistics are defined on.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    #[serde(rename = "nan")]
    NaN,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null(NullKind::Null), Into::into)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(NullKind::Null) => f.write_str("null"),
            Self::Null(NullKind::NaN) => f.write_str("NaN"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
        }
    }
}

impl Scalar {
    #[must_use]
    pub fn null() -> Self {
        Self::Null(NullKind::Null)
    }

    #[must_use]
    pub fn nan() -> Self {
        Self::Null(NullKind::NaN)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Null(NullKind::NaN)) || matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64(_) | Self::Float64(_))
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    /// Value equality where every missing marker equals every other.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => true,
            (true, false) | (false, true) => false,
            (false, false) => match (self, other) {
                (Self::Int64(a), Self::Float64(b)) | (Self::Float64(b), Self::Int64(a)) => {
                    (*a as f64) == *b
                }
                _ => self == other,
            },
        }
    }

    /// Numeric view used by statistics: only `Int64`/`Float64` qualify and
    /// missing values yield `None`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    /// Hashable structural key for grouping and equality joins.
    #[must_use]
    pub fn to_key(&self) -> ScalarKey {
        if self.is_missing() {
            return ScalarKey::Missing;
        }
        match self {
            Self::Bool(v) => ScalarKey::Bool(*v),
            Self::Int64(v) => ScalarKey::number(*v as f64),
            Self::Float64(v) => ScalarKey::number(*v),
            Self::Utf8(v) => ScalarKey::Utf8(v.clone()),
            Self::Null(_) => ScalarKey::Missing,
        }
    }

    /// Total order over non-missing values of one column.
    #[must_use]
    pub fn cmp_non_missing(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(lhs), Self::Bool(rhs)) => lhs.cmp(rhs),
            (Self::Int64(lhs), Self::Int64(rhs)) => lhs.cmp(rhs),
            (Self::Utf8(lhs), Self::Utf8(rhs)) => lhs.cmp(rhs),
            (Self::Float64(_) | Self::Int64(_), Self::Float64(_) | Self::Int64(_)) => {
                let lhs = self.as_number().unwrap_or(f64::NAN);
                let rhs = other.as_number().unwrap_or(f64::NAN);
                lhs.total_cmp(&rhs)
            }
            _ => self.dtype().cmp(&other.dtype()),
        }
    }

    /// Ascending order with missing values first.
    #[must_use]
    pub fn cmp_nulls_first(&self, other: &Self) -> Ordering {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.cmp_non_missing(other),
        }
    }
}

/// Structural, hashable projection of a [`Scalar`].
///
/// `Int64` and `Float64` values that compare equal map to the same key,
/// `-0.0` folds into `0.0`, and every missing marker maps to `Missing`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarKey {
    Missing,
    Bool(bool),
    Number(u64),
    Utf8(String),
}

impl ScalarKey {
    fn number(value: f64) -> Self {
        let normalized = if value == 0.0 { 0.0 } else { value };
        Self::Number(normalized.to_bits())
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Structured error category shared by every crate in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LengthMismatch,
    ColumnNotFound,
    LabelNotFound,
    IndexOutOfRange,
    UnsupportedType,
    EmptyCollection,
    InsufficientData,
    UnsupportedJoinType,
    UnsupportedAggregationMethod,
    InvalidArgument,
    IncompatibleTypes,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("expected 0/1 for bool cast from int64 but found {value}")]
    InvalidBoolInt { value: i64 },
    #[error("expected 0.0/1.0 for bool cast from float64 but found {value}")]
    InvalidBoolFloat { value: f64 },
}

impl TypeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IncompatibleDtypes { .. } => ErrorKind::IncompatibleTypes,
            Self::InvalidCast { .. }
            | Self::LossyFloatToInt { .. }
            | Self::InvalidBoolInt { .. }
            | Self::InvalidBoolFloat { .. } => ErrorKind::UnsupportedType,
        }
    }
}

pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool, Float64) | (Float64, Bool) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(current, value.dtype())?;
    }
    Ok(current)
}

/// Cast a scalar to a target dtype, taking ownership so values that already
/// have the target dtype pass through without a clone.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if matches!(value, Scalar::Null(_)) {
        return Ok(Scalar::missing_for_dtype(target));
    }
    if from == target {
        return Ok(value);
    }

    match target {
        DType::Null => Ok(Scalar::null()),
        DType::Bool => match &value {
            Scalar::Int64(v) => match *v {
                0 => Ok(Scalar::Bool(false)),
                1 => Ok(Scalar::Bool(true)),
                _ => Err(TypeError::InvalidBoolInt { value: *v }),
            },
            Scalar::Float64(v) => {
                if *v == 0.0 {
                    Ok(Scalar::Bool(false))
                } else if *v == 1.0 {
                    Ok(Scalar::Bool(true))
                } else {
                    Err(TypeError::InvalidBoolFloat { value: *v })
                }
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Int64 => match &value {
            Scalar::Bool(v) => Ok(Scalar::Int64(i64::from(*v))),
            Scalar::Float64(v) => {
                if !v.is_finite() || *v != v.trunc() {
                    return Err(TypeError::LossyFloatToInt { value: *v });
                }
                if *v < i64::MIN as f64 || *v > i64::MAX as f64 {
                    return Err(TypeError::LossyFloatToInt { value: *v });
                }
                Ok(Scalar::Int64(*v as i64))
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Float64 => match &value {
            Scalar::Bool(v) => Ok(Scalar::Float64(if *v { 1.0 } else { 0.0 })),
            Scalar::Int64(v) => Ok(Scalar::Float64(*v as f64)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Utf8 => Err(TypeError::InvalidCast { from, to: target }),
    }
}

// ── Reductions over present numbers ────────────────────────────────────

/// Non-missing numeric values in order; text and bool cells are ignored.
#[must_use]
pub fn collect_numbers(values: &[Scalar]) -> Vec<f64> {
    values.iter().filter_map(Scalar::as_number).collect()
}

/// Arithmetic mean; NaN for an empty slice.
#[must_use]
pub fn mean(nums: &[f64]) -> f64 {
    if nums.is_empty() {
        return f64::NAN;
    }
    nums.iter().sum::<f64>() / nums.len() as f64
}

/// Variance with `len - ddof` in the denominator; NaN when `len <= ddof`.
#[must_use]
pub fn variance(nums: &[f64], ddof: usize) -> f64 {
    if nums.len() <= ddof {
        return f64::NAN;
    }
    let center = mean(nums);
    let sum_sq: f64 = nums.iter().map(|x| (x - center).powi(2)).sum();
    sum_sq / (nums.len() - ddof) as f64
}

/// Sample standard deviation (`ddof = 1`).
#[must_use]
pub fn sample_std(nums: &[f64]) -> f64 {
    variance(nums, 1).sqrt()
}

/// Smallest value; NaN for an empty slice.
#[must_use]
pub fn minimum(nums: &[f64]) -> f64 {
    nums.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)
}

/// Largest value; NaN for an empty slice.
#[must_use]
pub fn maximum(nums: &[f64]) -> f64 {
    nums.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
}

/// Linear-interpolation quantile of unsorted values; NaN for an empty slice.
#[must_use]
pub fn quantile(nums: &[f64], q: f64) -> f64 {
    if nums.is_empty() {
        return f64::NAN;
    }
    let mut sorted = nums.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_linear(&sorted, q)
}

#[must_use]
pub fn median(nums: &[f64]) -> f64 {
    quantile(nums, 0.5)
}

/// Quantile of an ascending slice by linear interpolation between the two
/// nearest order statistics. `sorted` must be non-empty.
#[must_use]
pub fn percentile_linear(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}
