#![forbid(unsafe_code)]

use lf_types::{
    DType, ErrorKind, NullKind, Scalar, TypeError, cast_scalar_owned, common_dtype, infer_dtype,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed validity bits, one per row. A set bit marks a present value.
#[derive(Debug, Clone, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let len = values.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, value) in values.iter().enumerate() {
            if !value.is_missing() {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

impl PartialEq for ValidityMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let len = raw.bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, &valid) in raw.bits.iter().enumerate() {
            if valid {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Ok(Self { words, len })
    }
}

/// A single-dtype run of cells with its validity bitmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl ArithmeticOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Pow => lhs.powf(rhs),
        }
    }

    fn apply_i64(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Self::Add => lhs.checked_add(rhs),
            Self::Sub => lhs.checked_sub(rhs),
            Self::Mul => lhs.checked_mul(rhs),
            Self::Div | Self::Pow => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("position {position} out of bounds for column of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl ColumnError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::PositionOutOfBounds { .. } => ErrorKind::IndexOutOfRange,
            Self::Type(err) => err.kind(),
        }
    }
}

/// Combine two cells, yielding a missing marker when either side is missing
/// or not numeric.
fn combine_cells(left: &Scalar, right: &Scalar, op: ArithmeticOp, int_output: bool) -> Scalar {
    if int_output
        && let (Scalar::Int64(lhs), Scalar::Int64(rhs)) = (left, right)
        && let Some(out) = op.apply_i64(*lhs, *rhs)
    {
        return Scalar::Int64(out);
    }
    match (left.as_number(), right.as_number()) {
        (Some(lhs), Some(rhs)) => Scalar::Float64(op.apply(lhs, rhs)),
        _ if left.is_nan() || right.is_nan() => Scalar::Null(NullKind::NaN),
        _ => Scalar::null(),
    }
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .into_iter()
                .map(|value| cast_scalar_owned(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);
        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    /// Infer the dtype from the values and build the column.
    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Numeric columns plus all-null columns, which carry no values to reject.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.dtype.is_numeric() || self.dtype == DType::Null
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Scalar> {
        self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.validity.count_valid()
    }

    /// Each cell as `Some(f64)` when numeric and present.
    #[must_use]
    pub fn numbers(&self) -> Vec<Option<f64>> {
        self.values.iter().map(Scalar::as_number).collect()
    }

    /// Gather rows by position; `None` slots become missing cells.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .ok_or(ColumnError::PositionOutOfBounds {
                        position: *idx,
                        len: self.values.len(),
                    }),
                None => Ok(Scalar::missing_for_dtype(self.dtype)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(self.dtype, values)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let slots: Vec<Option<usize>> = positions.iter().copied().map(Some).collect();
        self.reindex_by_positions(&slots)
    }

    /// Element-wise arithmetic against another column of equal length.
    ///
    /// Non-numeric or missing cells produce a missing result instead of an
    /// error. `Int64 (+,-,*) Int64` stays integral unless it overflows.
    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let int_output = self.dtype == DType::Int64
            && right.dtype == DType::Int64
            && matches!(op, ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul);
        let values: Vec<Scalar> = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(l, r)| combine_cells(l, r, op, int_output))
            .collect();
        Self::from_mixed_numeric(values)
    }

    /// Broadcast a scalar over every cell.
    pub fn scalar_numeric(&self, scalar: &Scalar, op: ArithmeticOp) -> Result<Self, ColumnError> {
        let int_output = self.dtype == DType::Int64
            && scalar.dtype() == DType::Int64
            && matches!(op, ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul);
        let values: Vec<Scalar> = self
            .values
            .iter()
            .map(|cell| combine_cells(cell, scalar, op, int_output))
            .collect();
        Self::from_mixed_numeric(values)
    }

    /// Apply `f` to every numeric cell; other cells become NaN.
    pub fn map_numeric(&self, f: impl Fn(f64) -> f64) -> Result<Self, ColumnError> {
        let values = self
            .values
            .iter()
            .map(|cell| match cell.as_number() {
                Some(x) => Scalar::Float64(f(x)),
                None => Scalar::nan(),
            })
            .collect();
        Self::new(DType::Float64, values)
    }

    // Overflowed integer cells come back as Float64, so widen when mixed.
    fn from_mixed_numeric(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = match infer_dtype(&values)? {
            DType::Null => DType::Float64,
            other => other,
        };
        Self::new(dtype, values)
    }

    /// Replace every missing cell with `fill_value`, widening the dtype when
    /// the fill value needs it.
    pub fn fillna(&self, fill_value: &Scalar) -> Result<Self, ColumnError> {
        if fill_value.is_missing() {
            return Ok(self.clone());
        }
        let dtype = common_dtype(self.dtype, fill_value.dtype())?;
        let values = self
            .values
            .iter()
            .map(|v| {
                if v.is_missing() {
                    fill_value.clone()
                } else {
                    v.clone()
                }
            })
            .collect();

        Self::new(dtype, values)
    }

    /// Remove missing values, returning a shorter column.
    pub fn dropna(&self) -> Result<Self, ColumnError> {
        let values = self
            .values
            .iter()
            .filter(|v| !v.is_missing())
            .cloned()
            .collect();

        Self::new(self.dtype, values)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

#[cfg(test)]
mod tests {
    use lf_types::{DType, ErrorKind, NullKind, Scalar};

    use super::{ArithmeticOp, Column, ColumnError, ValidityMask};

    #[test]
    fn column_coerces_mixed_numeric_values() {
        let column = Column::from_values(vec![Scalar::Int64(1), Scalar::Float64(2.5)])
            .expect("column should build");
        assert_eq!(column.dtype(), DType::Float64);
        assert_eq!(column.values()[0], Scalar::Float64(1.0));
    }

    #[test]
    fn mixing_text_and_numbers_is_rejected() {
        let err = Column::from_values(vec![Scalar::Int64(1), Scalar::from("x")])
            .expect_err("mixed column");
        assert_eq!(err.kind(), ErrorKind::IncompatibleTypes);
    }

    #[test]
    fn validity_tracks_missing_cells() {
        let values = vec![Scalar::Int64(1), Scalar::null(), Scalar::Float64(f64::NAN)];
        let mask = ValidityMask::from_values(&values);
        assert_eq!(mask.bits().collect::<Vec<_>>(), vec![true, false, false]);
        assert_eq!(mask.count_valid(), 1);
    }

    #[test]
    fn reindex_injects_missing_for_unmatched_positions() {
        let column = Column::from_values(vec![Scalar::Int64(10), Scalar::Int64(20)])
            .expect("column should build");
        let out = column
            .reindex_by_positions(&[Some(1), None, Some(0)])
            .expect("reindex");
        assert_eq!(
            out.values(),
            &[Scalar::Int64(20), Scalar::Null(NullKind::Null), Scalar::Int64(10)]
        );
        assert_eq!(out.count_valid(), 2);
    }

    #[test]
    fn take_out_of_bounds_reports_position() {
        let column = Column::from_values(vec![Scalar::Int64(10)]).expect("column");
        let err = column.take(&[3]).expect_err("out of bounds");
        assert_eq!(err, ColumnError::PositionOutOfBounds { position: 3, len: 1 });
    }

    #[test]
    fn integer_addition_stays_integral() {
        let left = Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)]).expect("left");
        let right = Column::from_values(vec![Scalar::Int64(3), Scalar::null()]).expect("right");
        let out = left.binary_numeric(&right, ArithmeticOp::Add).expect("add");
        assert_eq!(out.dtype(), DType::Int64);
        assert_eq!(out.values()[0], Scalar::Int64(4));
        assert!(out.values()[1].is_missing());
    }

    #[test]
    fn division_and_power_produce_floats() {
        let left = Column::from_values(vec![Scalar::Int64(3), Scalar::Int64(2)]).expect("left");
        let out = left
            .scalar_numeric(&Scalar::Int64(2), ArithmeticOp::Div)
            .expect("div");
        assert_eq!(out.values(), &[Scalar::Float64(1.5), Scalar::Float64(1.0)]);
        let out = left
            .scalar_numeric(&Scalar::Int64(2), ArithmeticOp::Pow)
            .expect("pow");
        assert_eq!(out.values(), &[Scalar::Float64(9.0), Scalar::Float64(4.0)]);
    }

    #[test]
    fn text_cells_become_null_instead_of_failing() {
        let names = Column::from_values(vec![Scalar::from("a"), Scalar::from("b")]).expect("names");
        let out = names
            .scalar_numeric(&Scalar::Int64(1), ArithmeticOp::Mul)
            .expect("lenient arithmetic");
        assert_eq!(out.len(), 2);
        assert!(out.values().iter().all(Scalar::is_missing));
    }

    #[test]
    fn length_mismatch_is_reported() {
        let left = Column::from_values(vec![Scalar::Int64(1)]).expect("left");
        let right = Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)]).expect("right");
        let err = left
            .binary_numeric(&right, ArithmeticOp::Sub)
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::LengthMismatch);
    }

    #[test]
    fn fillna_widens_all_null_column() {
        let column = Column::from_values(vec![Scalar::null(), Scalar::null()]).expect("nulls");
        let filled = column.fillna(&Scalar::Int64(0)).expect("fill");
        assert_eq!(filled.dtype(), DType::Int64);
        assert_eq!(filled.values(), &[Scalar::Int64(0), Scalar::Int64(0)]);
    }

    #[test]
    fn dropna_removes_missing_cells() {
        let column = Column::from_values(vec![
            Scalar::Float64(1.0),
            Scalar::null(),
            Scalar::Float64(3.0),
        ])
        .expect("column");
        let dropped = column.dropna().expect("dropna");
        assert_eq!(dropped.values(), &[Scalar::Float64(1.0), Scalar::Float64(3.0)]);
    }

    #[test]
    fn map_numeric_marks_non_numeric_as_nan() {
        let column = Column::from_values(vec![Scalar::Int64(-2), Scalar::null()]).expect("column");
        let out = column.map_numeric(f64::abs).expect("map");
        assert_eq!(out.values()[0], Scalar::Float64(2.0));
        assert!(out.values()[1].is_nan());
    }
}
