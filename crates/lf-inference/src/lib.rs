#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use lf_frame::{FrameError, LabeledTable};
use lf_groupby::{GroupByError, GroupByOptions, group_by_with_options};
use lf_special::{ChiSquared, ContinuousDistribution, FisherF, Normal, StudentsT};
use lf_stats::pearson;
use lf_types::{ErrorKind, Scalar, ScalarKey, mean as sample_mean, variance};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("{operation} needs at least {required} observations, got {actual}")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("sample length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("{operation} is undefined for a sample with zero variance")]
    ZeroVariance { operation: &'static str },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
}

impl InferenceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::ZeroVariance { .. } | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Frame(err) => err.kind(),
            Self::GroupBy(err) => err.kind(),
        }
    }
}

fn require(operation: &'static str, required: usize, actual: usize) -> Result<(), InferenceError> {
    if actual < required {
        return Err(InferenceError::InsufficientData {
            operation,
            required,
            actual,
        });
    }
    Ok(())
}

fn finite(sample: &[f64]) -> Vec<f64> {
    sample.iter().copied().filter(|x| !x.is_nan()).collect()
}

/// Present numeric values of `column`, in row order.
pub fn column_sample(table: &LabeledTable, column: &str) -> Result<Vec<f64>, InferenceError> {
    Ok(table.column(column)?.numbers("column_sample")?)
}

/// Direction of the alternative hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    #[default]
    TwoSided,
    Less,
    Greater,
}

impl Alternative {
    fn p_value(self, dist: &StudentsT, statistic: f64) -> f64 {
        match self {
            Self::TwoSided => dist.two_sided_p(statistic),
            Self::Less => dist.cdf(statistic),
            Self::Greater => dist.sf(statistic),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TTestVariant {
    /// Student's test with a pooled variance estimate.
    #[default]
    Pooled,
    /// Welch's test with Satterthwaite degrees of freedom.
    Welch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    pub statistic: f64,
    pub p_value: f64,
    pub df: f64,
    pub mean_a: f64,
    /// Second sample mean, or the hypothesized mean for a one-sample test.
    pub mean_b: f64,
}

fn t_distribution(df: f64, operation: &'static str) -> Result<StudentsT, InferenceError> {
    StudentsT::new(df).ok_or(InferenceError::ZeroVariance { operation })
}

#[instrument(skip_all, fields(n_a = a.len(), n_b = b.len(), variant = ?variant, alternative = ?alternative))]
pub fn t_test_two_sample(
    a: &[f64],
    b: &[f64],
    variant: TTestVariant,
    alternative: Alternative,
) -> Result<TTestResult, InferenceError> {
    const OP: &str = "two-sample t-test";
    let (a, b) = (finite(a), finite(b));
    require(OP, 2, a.len())?;
    require(OP, 2, b.len())?;

    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mean_a, mean_b) = (sample_mean(&a), sample_mean(&b));
    let (var_a, var_b) = (variance(&a, 1), variance(&b, 1));

    let (se, df) = match variant {
        TTestVariant::Pooled => {
            let df = n1 + n2 - 2.0;
            let pooled = ((n1 - 1.0) * var_a + (n2 - 1.0) * var_b) / df;
            ((pooled * (1.0 / n1 + 1.0 / n2)).sqrt(), df)
        }
        TTestVariant::Welch => {
            let (qa, qb) = (var_a / n1, var_b / n2);
            let df = (qa + qb).powi(2) / (qa * qa / (n1 - 1.0) + qb * qb / (n2 - 1.0));
            ((qa + qb).sqrt(), df)
        }
    };
    if se == 0.0 {
        return Err(InferenceError::ZeroVariance { operation: OP });
    }

    let statistic = (mean_a - mean_b) / se;
    let p_value = alternative.p_value(&t_distribution(df, OP)?, statistic);
    debug!(statistic, p_value, df, "two-sample t-test");
    Ok(TTestResult {
        statistic,
        p_value,
        df,
        mean_a,
        mean_b,
    })
}

#[instrument(skip_all, fields(n = sample.len(), mu = mu, alternative = ?alternative))]
pub fn t_test_one_sample(
    sample: &[f64],
    mu: f64,
    alternative: Alternative,
) -> Result<TTestResult, InferenceError> {
    const OP: &str = "one-sample t-test";
    let sample = finite(sample);
    require(OP, 2, sample.len())?;

    let n = sample.len() as f64;
    let mean = sample_mean(&sample);
    let se = (variance(&sample, 1) / n).sqrt();
    if se == 0.0 {
        return Err(InferenceError::ZeroVariance { operation: OP });
    }
    let df = n - 1.0;
    let statistic = (mean - mu) / se;
    let p_value = alternative.p_value(&t_distribution(df, OP)?, statistic);
    debug!(statistic, p_value, "one-sample t-test");
    Ok(TTestResult {
        statistic,
        p_value,
        df,
        mean_a: mean,
        mean_b: mu,
    })
}

/// Two-sample test on the present values of two table columns.
pub fn t_test_columns(
    table: &LabeledTable,
    a: &str,
    b: &str,
    variant: TTestVariant,
    alternative: Alternative,
) -> Result<TTestResult, InferenceError> {
    t_test_two_sample(
        &column_sample(table, a)?,
        &column_sample(table, b)?,
        variant,
        alternative,
    )
}

/// Rows of `x` and `y` where both are present.
fn paired(x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>), InferenceError> {
    if x.len() != y.len() {
        return Err(InferenceError::LengthMismatch {
            left: x.len(),
            right: y.len(),
        });
    }
    Ok(x
        .iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .unzip())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationTestResult {
    pub r: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub df: f64,
    pub n: usize,
}

/// Pearson r with the t-test of `r = 0` on `n - 2` degrees of freedom.
#[instrument(skip_all, fields(n = x.len()))]
pub fn correlation_test(x: &[f64], y: &[f64]) -> Result<CorrelationTestResult, InferenceError> {
    const OP: &str = "correlation test";
    let (x, y) = paired(x, y)?;
    require(OP, 3, x.len())?;

    let r = pearson(&x, &y);
    if r.is_nan() {
        return Err(InferenceError::ZeroVariance { operation: OP });
    }
    let n = x.len();
    let df = (n - 2) as f64;
    let statistic = if (1.0 - r * r) <= 0.0 {
        f64::INFINITY.copysign(r)
    } else {
        r * (df / (1.0 - r * r)).sqrt()
    };
    let p_value = t_distribution(df, OP)?.two_sided_p(statistic);
    debug!(r, p_value, "correlation test");
    Ok(CorrelationTestResult {
        r,
        statistic,
        p_value,
        df,
        n,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub slope_std_error: f64,
    pub intercept_std_error: f64,
    pub slope_t: f64,
    pub intercept_t: f64,
    pub slope_p_value: f64,
    pub intercept_p_value: f64,
    pub residual_std_error: f64,
    pub df: f64,
    pub n: usize,
}

impl RegressionResult {
    #[must_use]
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least squares fit of `y = intercept + slope * x`.
#[instrument(skip_all, fields(n = x.len()))]
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<RegressionResult, InferenceError> {
    const OP: &str = "linear regression";
    let (x, y) = paired(x, y)?;
    require(OP, 3, x.len())?;

    let n = x.len();
    let nf = n as f64;
    let mean_x = sample_mean(&x);
    let mean_y = sample_mean(&y);
    let sxx: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return Err(InferenceError::ZeroVariance { operation: OP });
    }
    let sxy: f64 = x
        .iter()
        .zip(&y)
        .map(|(xi, yi)| (xi - mean_x) * (yi - mean_y))
        .sum();
    let syy: f64 = y.iter().map(|yi| (yi - mean_y).powi(2)).sum();

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let sse: f64 = x
        .iter()
        .zip(&y)
        .map(|(xi, yi)| (yi - (intercept + slope * xi)).powi(2))
        .sum();
    let r_squared = if syy == 0.0 { 1.0 } else { 1.0 - sse / syy };

    let df = nf - 2.0;
    let residual_std_error = (sse / df).sqrt();
    let slope_std_error = residual_std_error / sxx.sqrt();
    let intercept_std_error = residual_std_error * (1.0 / nf + mean_x * mean_x / sxx).sqrt();
    let slope_t = slope / slope_std_error;
    let intercept_t = intercept / intercept_std_error;
    let dist = t_distribution(df, OP)?;

    debug!(slope, intercept, r_squared, "linear regression");
    Ok(RegressionResult {
        slope,
        intercept,
        r_squared,
        slope_std_error,
        intercept_std_error,
        slope_t,
        intercept_t,
        slope_p_value: dist.two_sided_p(slope_t),
        intercept_p_value: dist.two_sided_p(intercept_t),
        residual_std_error,
        df,
        n,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnovaResult {
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_between: f64,
    pub df_within: f64,
    pub ss_between: f64,
    pub ss_within: f64,
    pub ms_between: f64,
    pub ms_within: f64,
}

/// One-way analysis of variance across `groups`.
#[instrument(skip_all, fields(groups = groups.len()))]
pub fn anova(groups: &[&[f64]]) -> Result<AnovaResult, InferenceError> {
    const OP: &str = "one-way ANOVA";
    require(OP, 2, groups.len())?;
    let groups: Vec<Vec<f64>> = groups.iter().map(|g| finite(g)).collect();
    for group in &groups {
        require(OP, 2, group.len())?;
    }

    let total: usize = groups.iter().map(Vec::len).sum();
    let grand_mean = groups.iter().flatten().sum::<f64>() / total as f64;
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for group in &groups {
        let mean = sample_mean(group);
        ss_between += group.len() as f64 * (mean - grand_mean).powi(2);
        ss_within += group.iter().map(|x| (x - mean).powi(2)).sum::<f64>();
    }

    let df_between = (groups.len() - 1) as f64;
    let df_within = (total - groups.len()) as f64;
    let ms_between = ss_between / df_between;
    let ms_within = ss_within / df_within;
    let f_statistic = ms_between / ms_within;
    let p_value = match FisherF::new(df_between, df_within) {
        Some(dist) if !f_statistic.is_nan() => dist.sf(f_statistic),
        _ => f64::NAN,
    };

    debug!(f_statistic, p_value, "one-way ANOVA");
    Ok(AnovaResult {
        f_statistic,
        p_value,
        df_between,
        df_within,
        ss_between,
        ss_within,
        ms_between,
        ms_within,
    })
}

/// ANOVA of `value_column` across the groups of `group_column`. Rows with a
/// missing group key are left out.
pub fn anova_by_group(
    table: &LabeledTable,
    value_column: &str,
    group_column: &str,
) -> Result<AnovaResult, InferenceError> {
    let grouped = group_by_with_options(table, &[group_column], GroupByOptions { dropna: true })?;
    let samples = grouped
        .groups()
        .iter()
        .map(|group| column_sample(group.table(), value_column))
        .collect::<Result<Vec<_>, _>>()?;
    let slices: Vec<&[f64]> = samples.iter().map(Vec::as_slice).collect();
    anova(&slices)
}

/// Joint counts of two categorical columns, categories in first-seen order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyTable {
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    pub observed: Vec<Vec<usize>>,
}

fn category_slot(
    slots: &mut HashMap<ScalarKey, usize>,
    labels: &mut Vec<String>,
    value: &Scalar,
) -> usize {
    *slots.entry(value.to_key()).or_insert_with(|| {
        labels.push(value.to_string());
        labels.len() - 1
    })
}

impl ContingencyTable {
    /// Cross-tabulate `a` against `b`, skipping rows where either is missing.
    pub fn from_columns(table: &LabeledTable, a: &str, b: &str) -> Result<Self, InferenceError> {
        let left = table.column_values(a)?.values();
        let right = table.column_values(b)?.values();

        let mut row_slots = HashMap::new();
        let mut column_slots = HashMap::new();
        let mut row_labels = Vec::new();
        let mut column_labels = Vec::new();
        let mut cells = Vec::new();
        for (x, y) in left.iter().zip(right) {
            if x.is_missing() || y.is_missing() {
                continue;
            }
            let r = category_slot(&mut row_slots, &mut row_labels, x);
            let c = category_slot(&mut column_slots, &mut column_labels, y);
            cells.push((r, c));
        }

        let mut observed = vec![vec![0; column_labels.len()]; row_labels.len()];
        for (r, c) in cells {
            observed[r][c] += 1;
        }
        Ok(Self {
            row_labels,
            column_labels,
            observed,
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.observed.iter().flatten().sum()
    }

    /// Counts expected under independence: `row_total * col_total / total`.
    #[must_use]
    pub fn expected(&self) -> Vec<Vec<f64>> {
        let total = self.total() as f64;
        let column_totals: Vec<usize> = (0..self.column_labels.len())
            .map(|c| self.observed.iter().map(|row| row[c]).sum())
            .collect();
        self.observed
            .iter()
            .map(|row| {
                let row_total = row.iter().sum::<usize>() as f64;
                column_totals
                    .iter()
                    .map(|&col_total| row_total * col_total as f64 / total)
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub p_value: f64,
    pub df: usize,
    pub contingency: ContingencyTable,
    pub expected: Vec<Vec<f64>>,
}

/// Pearson chi-square test of independence between two categorical columns.
#[instrument(skip_all, fields(rows = table.len(), a = a, b = b))]
pub fn chi_square_independence(
    table: &LabeledTable,
    a: &str,
    b: &str,
) -> Result<ChiSquareResult, InferenceError> {
    const OP: &str = "chi-square test";
    let contingency = ContingencyTable::from_columns(table, a, b)?;
    require(OP, 2, contingency.row_labels.len())?;
    require(OP, 2, contingency.column_labels.len())?;

    let expected = contingency.expected();
    let statistic: f64 = contingency
        .observed
        .iter()
        .flatten()
        .zip(expected.iter().flatten())
        .map(|(&o, &e)| (o as f64 - e).powi(2) / e)
        .sum();
    let df = (contingency.row_labels.len() - 1) * (contingency.column_labels.len() - 1);
    let p_value = ChiSquared::new(df as f64).map_or(f64::NAN, |dist| dist.sf(statistic));

    debug!(statistic, p_value, df, "chi-square test");
    Ok(ChiSquareResult {
        statistic,
        p_value,
        df,
        contingency,
        expected,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub margin: f64,
    pub level: f64,
    pub df: f64,
}

/// Two-sided t interval for the mean at `level` (e.g. `0.95`).
pub fn confidence_interval(sample: &[f64], level: f64) -> Result<ConfidenceInterval, InferenceError> {
    const OP: &str = "confidence interval";
    if !(level > 0.0 && level < 1.0) {
        return Err(InferenceError::InvalidArgument(format!(
            "confidence level must lie in (0, 1), got {level}"
        )));
    }
    let sample = finite(sample);
    require(OP, 2, sample.len())?;

    let n = sample.len() as f64;
    let mean = sample_mean(&sample);
    let df = n - 1.0;
    let critical = t_distribution(df, OP)?.quantile(1.0 - (1.0 - level) / 2.0);
    let margin = critical * (variance(&sample, 1) / n).sqrt();
    Ok(ConfidenceInterval {
        mean,
        lower: mean - margin,
        upper: mean + margin,
        margin,
        level,
        df,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalityTest {
    ShapiroWilk,
    JarqueBera,
    AndersonDarling,
}

impl fmt::Display for NormalityTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ShapiroWilk => "shapiro_wilk",
            Self::JarqueBera => "jarque_bera",
            Self::AndersonDarling => "anderson_darling",
        })
    }
}

/// Approximate statistic and p-value. Small p-values reject normality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalityResult {
    pub test: NormalityTest,
    pub statistic: f64,
    pub p_value: f64,
    pub n: usize,
}

#[instrument(skip_all, fields(n = sample.len(), test = %test))]
pub fn normality_test(sample: &[f64], test: NormalityTest) -> Result<NormalityResult, InferenceError> {
    const OP: &str = "normality test";
    let mut sorted = finite(sample);
    require(OP, 3, sorted.len())?;
    sorted.sort_by(f64::total_cmp);
    if sorted[0] == sorted[sorted.len() - 1] {
        return Err(InferenceError::ZeroVariance { operation: OP });
    }

    let (statistic, p_value) = match test {
        NormalityTest::ShapiroWilk => shapiro_wilk(&sorted),
        NormalityTest::JarqueBera => jarque_bera(&sorted),
        NormalityTest::AndersonDarling => anderson_darling(&sorted),
    };
    debug!(statistic, p_value, "normality test");
    Ok(NormalityResult {
        test,
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
        n: sorted.len(),
    })
}

fn poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// W with Royston's coefficient and p-value approximations.
fn shapiro_wilk(sorted: &[f64]) -> (f64, f64) {
    const C1: [f64; 6] = [0.0, 0.221_157, -0.147_981, -2.071_19, 4.434_685, -2.706_056];
    const C2: [f64; 6] = [0.0, 0.042_981, -0.293_762, -1.752_461, 5.682_633, -3.582_633];

    let n = sorted.len();
    let nf = n as f64;
    let half = n / 2;

    let m: Vec<f64> = (1..=half)
        .map(|i| lf_special::standard_normal_quantile((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / nf.sqrt();

    let mut a = vec![0.0; half];
    if n == 3 {
        a[0] = 0.5_f64.sqrt();
    } else {
        a[0] = poly(&C1, rsn) - m[0] / ssumm2;
        let (fixed, fac) = if n > 5 {
            a[1] = poly(&C2, rsn) - m[1] / ssumm2;
            let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
                / (1.0 - 2.0 * a[0] * a[0] - 2.0 * a[1] * a[1]))
                .sqrt();
            (2, fac)
        } else {
            let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a[0] * a[0])).sqrt();
            (1, fac)
        };
        for i in fixed..half {
            a[i] = -m[i] / fac;
        }
    }

    let mean = sample_mean(sorted);
    let ss: f64 = sorted.iter().map(|x| (x - mean).powi(2)).sum();
    let b: f64 = (0..half)
        .map(|i| a[i] * (sorted[n - 1 - i] - sorted[i]))
        .sum();
    let w = (b * b / ss).min(1.0);

    let p = if n == 3 {
        // exact for n = 3
        let p = 6.0 / std::f64::consts::PI * (w.sqrt().asin() - 0.75_f64.sqrt().asin());
        p.max(0.0)
    } else if n <= 11 {
        let gamma = poly(&[-2.273, 0.459], nf);
        let mu = poly(&[0.544, -0.399_78, 0.025_054, -0.000_671_4], nf);
        let sigma = poly(&[1.3822, -0.778_57, 0.062_767, -0.002_032_2], nf).exp();
        let w1 = (1.0 - w).ln();
        if w1 >= gamma {
            0.0
        } else {
            let y = -(gamma - w1).ln();
            Normal::standard().sf((y - mu) / sigma)
        }
    } else {
        let ln_n = nf.ln();
        let mu = poly(&[-1.5861, -0.310_82, -0.083_751, 0.003_891_5], ln_n);
        let sigma = poly(&[-0.4803, -0.082_676, 0.003_030_2], ln_n).exp();
        Normal::standard().sf(((1.0 - w).ln() - mu) / sigma)
    };
    (w, p)
}

/// `n/6 * (S^2 + K^2/4)` against chi-square with 2 degrees of freedom.
fn jarque_bera(sorted: &[f64]) -> (f64, f64) {
    let n = sorted.len() as f64;
    let mean = sample_mean(sorted);
    let moment = |k: i32| sorted.iter().map(|x| (x - mean).powi(k)).sum::<f64>() / n;
    let m2 = moment(2);
    let skewness = moment(3) / m2.powf(1.5);
    let excess_kurtosis = moment(4) / (m2 * m2) - 3.0;
    let statistic = n / 6.0 * (skewness * skewness + excess_kurtosis * excess_kurtosis / 4.0);
    let p = ChiSquared::new(2.0).map_or(f64::NAN, |dist| dist.sf(statistic));
    (statistic, p)
}

/// A^2 with the small-sample adjustment and D'Agostino-Stephens p-value.
fn anderson_darling(sorted: &[f64]) -> (f64, f64) {
    let n = sorted.len();
    let nf = n as f64;
    let mean = sample_mean(sorted);
    let sd = variance(sorted, 1).sqrt();
    let normal = Normal::standard();
    let cdf: Vec<f64> = sorted
        .iter()
        .map(|x| normal.cdf((x - mean) / sd).clamp(1e-300, 1.0 - 1e-16))
        .collect();

    let sum: f64 = (0..n)
        .map(|i| (2.0 * i as f64 + 1.0) * (cdf[i].ln() + (1.0 - cdf[n - 1 - i]).ln()))
        .sum();
    let a2 = -nf - sum / nf;
    let adjusted = a2 * (1.0 + 0.75 / nf + 2.25 / (nf * nf));

    let p = if adjusted >= 0.6 {
        (1.2937 - 5.709 * adjusted + 0.0186 * adjusted * adjusted).exp()
    } else if adjusted >= 0.34 {
        (0.9177 - 4.279 * adjusted - 1.38 * adjusted * adjusted).exp()
    } else if adjusted >= 0.2 {
        1.0 - (-8.318 + 42.796 * adjusted - 59.938 * adjusted * adjusted).exp()
    } else {
        1.0 - (-13.436 + 101.14 * adjusted - 223.73 * adjusted * adjusted).exp()
    };
    (adjusted, p)
}
