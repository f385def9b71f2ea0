#![forbid(unsafe_code)]

//! Fixture-driven conformance checks.
//!
//! Each JSON file under `fixtures/` describes one case: an operation, its
//! inputs, and either the expected outcome or the expected error kind. The
//! harness runs the case against the engine crates and reports mismatches
//! instead of panicking, so one broken case never hides the others.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lf_frame::{LabeledTable, LabeledVector};
use lf_groupby::{AggFunc, group_by};
use lf_index::Index;
use lf_inference::{
    TTestVariant, chi_square_independence, column_sample, linear_regression, t_test_two_sample,
};
use lf_join::{JoinType, join};
use lf_stats::{CorrelationMethod, corr_matrix, correlation, rolling_mean};
use lf_types::{ErrorKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    /// Absolute tolerance for floating-point comparisons.
    pub tolerance: f64,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("fixture {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    VectorStats,
    TableConstruct,
    RecordsRoundTrip,
    GroupBy,
    GroupAggregate,
    Join,
    SortBy,
    CorrMatrix,
    Correlation,
    RollingMean,
    LinearRegression,
    TTest,
    ChiSquare,
}

impl FixtureOperation {
    #[must_use]
    pub fn operation_name(self) -> &'static str {
        match self {
            Self::VectorStats => "vector_stats",
            Self::TableConstruct => "table_construct",
            Self::RecordsRoundTrip => "records_round_trip",
            Self::GroupBy => "group_by",
            Self::GroupAggregate => "group_aggregate",
            Self::Join => "join",
            Self::SortBy => "sort_by",
            Self::CorrMatrix => "corr_matrix",
            Self::Correlation => "correlation",
            Self::RollingMean => "rolling_mean",
            Self::LinearRegression => "linear_regression",
            Self::TTest => "t_test",
            Self::ChiSquare => "chi_square",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureColumn {
    pub name: String,
    pub values: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureTable {
    /// Row labels; positional `"0".."n-1"` when absent.
    #[serde(default)]
    pub index: Option<Vec<String>>,
    pub columns: Vec<FixtureColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureGroup {
    pub key: Vec<Scalar>,
    /// Row labels of the original table that fall in this group.
    pub rows: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFixture {
    pub case_id: String,
    pub operation: FixtureOperation,
    #[serde(default)]
    pub vector: Option<Vec<Scalar>>,
    #[serde(default)]
    pub table: Option<FixtureTable>,
    #[serde(default)]
    pub table_right: Option<FixtureTable>,
    /// Column arguments: group keys, sort keys, or the `(a, b)` pair.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub on: Option<String>,
    #[serde(default)]
    pub how: Option<String>,
    /// Correlation method, aggregation name, or t-test variant.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default)]
    pub ascending: Option<bool>,
    #[serde(default)]
    pub expected_table: Option<FixtureTable>,
    #[serde(default)]
    pub expected_numbers: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub expected_groups: Option<Vec<FixtureGroup>>,
    #[serde(default)]
    pub expected_len: Option<usize>,
    #[serde(default)]
    pub expected_error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results
            .iter()
            .filter(|result| result.status == CaseStatus::Fail)
    }
}

#[instrument(skip_all, fields(root = %config.fixture_root.display()))]
pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(&config.fixture_root)?;
    let results: Vec<CaseResult> = fixtures
        .iter()
        .map(|fixture| run_fixture(config, fixture))
        .collect();
    let failed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Fail)
        .count();
    debug!(fixtures = results.len(), failed, "conformance suite finished");
    Ok(SuiteReport {
        suite: "scenarios".to_owned(),
        fixture_count: results.len(),
        passed: results.len() - failed,
        failed,
        results,
    })
}

/// Every `*.json` fixture under `root`, sorted by case id.
pub fn load_fixtures(root: &Path) -> Result<Vec<CaseFixture>, HarnessError> {
    let mut fixtures = list_fixture_files(root)?
        .into_iter()
        .map(|path| load_fixture(&path))
        .collect::<Result<Vec<_>, _>>()?;
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

pub fn load_fixture(path: &Path) -> Result<CaseFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|source| HarnessError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[must_use]
pub fn run_fixture(config: &HarnessConfig, fixture: &CaseFixture) -> CaseResult {
    let mismatch = check_fixture(config, fixture).err();
    if let Some(reason) = &mismatch {
        warn!(case_id = %fixture.case_id, %reason, "fixture mismatch");
    }
    CaseResult {
        case_id: fixture.case_id.clone(),
        operation: fixture.operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
    }
}

// ── Execution ──────────────────────────────────────────────────────────

/// What an operation produced, in a shape the expectations can check.
enum Observed {
    Numbers(BTreeMap<String, f64>),
    Table(LabeledTable),
    Groups(Vec<FixtureGroup>),
}

enum ExecFailure {
    /// The engine rejected the inputs.
    Engine { kind: ErrorKind, message: String },
    /// The fixture itself is incomplete.
    Fixture(String),
}

macro_rules! engine {
    ($expr:expr) => {
        $expr.map_err(|err| ExecFailure::Engine {
            kind: err.kind(),
            message: err.to_string(),
        })
    };
}

fn required<'a, T>(value: &'a Option<T>, field: &str, op: FixtureOperation) -> Result<&'a T, ExecFailure> {
    value.as_ref().ok_or_else(|| {
        ExecFailure::Fixture(format!("{field} is required for {}", op.operation_name()))
    })
}

fn column_pair(fixture: &CaseFixture) -> Result<(&str, &str), ExecFailure> {
    match required(&fixture.columns, "columns", fixture.operation)?.as_slice() {
        [a, b] => Ok((a.as_str(), b.as_str())),
        other => Err(ExecFailure::Fixture(format!(
            "{} takes exactly two columns, got {}",
            fixture.operation.operation_name(),
            other.len()
        ))),
    }
}

fn build_table(fixture: &FixtureTable) -> Result<LabeledTable, ExecFailure> {
    let data: Vec<(String, Vec<Scalar>)> = fixture
        .columns
        .iter()
        .map(|column| (column.name.clone(), column.values.clone()))
        .collect();
    match &fixture.index {
        Some(labels) => engine!(LabeledTable::from_columns_with_index(data, labels.clone())),
        None => engine!(LabeledTable::from_columns(data)),
    }
}

fn execute(fixture: &CaseFixture) -> Result<Observed, ExecFailure> {
    let op = fixture.operation;
    let table = || build_table(required(&fixture.table, "table", op)?);
    let key_names = || -> Result<Vec<&str>, ExecFailure> {
        Ok(required(&fixture.columns, "columns", op)?
            .iter()
            .map(String::as_str)
            .collect())
    };
    let method = || -> Result<CorrelationMethod, ExecFailure> {
        fixture
            .method
            .as_deref()
            .map_or(Ok(CorrelationMethod::Pearson), |m| {
                engine!(m.parse::<CorrelationMethod>())
            })
    };

    match op {
        FixtureOperation::VectorStats => {
            let values = required(&fixture.vector, "vector", op)?.clone();
            let vector = engine!(LabeledVector::from_values("values", values))?;
            let mut numbers = BTreeMap::new();
            numbers.insert("count".to_owned(), vector.count() as f64);
            numbers.insert("sum".to_owned(), engine!(vector.sum())?);
            numbers.insert("mean".to_owned(), engine!(vector.mean())?);
            numbers.insert("var".to_owned(), engine!(vector.var())?);
            numbers.insert("std".to_owned(), engine!(vector.std())?);
            numbers.insert("min".to_owned(), engine!(vector.min())?);
            numbers.insert("max".to_owned(), engine!(vector.max())?);
            numbers.insert("median".to_owned(), engine!(vector.median())?);
            Ok(Observed::Numbers(numbers))
        }
        FixtureOperation::TableConstruct => Ok(Observed::Table(table()?)),
        FixtureOperation::RecordsRoundTrip => {
            let original = table()?;
            let rebuilt = engine!(LabeledTable::from_records(&original.to_records()))?;
            Ok(Observed::Table(rebuilt))
        }
        FixtureOperation::GroupBy => {
            let table = table()?;
            let grouped = engine!(group_by(&table, &key_names()?))?;
            let labels = table.index().labels();
            let groups = grouped
                .groups()
                .iter()
                .map(|group| FixtureGroup {
                    key: group.key().values().to_vec(),
                    rows: group
                        .positions()
                        .iter()
                        .map(|&p| labels[p].clone())
                        .collect(),
                })
                .collect();
            Ok(Observed::Groups(groups))
        }
        FixtureOperation::GroupAggregate => {
            let table = table()?;
            let func = engine!(required(&fixture.method, "method", op)?.parse::<AggFunc>())?;
            let grouped = engine!(group_by(&table, &key_names()?))?;
            Ok(Observed::Table(engine!(grouped.aggregate(func))?))
        }
        FixtureOperation::Join => {
            let left = table()?;
            let right = build_table(required(&fixture.table_right, "table_right", op)?)?;
            let on = required(&fixture.on, "on", op)?;
            let how = engine!(fixture.how.as_deref().unwrap_or("inner").parse::<JoinType>())?;
            Ok(Observed::Table(engine!(join(&left, &right, on, how))?))
        }
        FixtureOperation::SortBy => {
            let table = table()?;
            let ascending = fixture.ascending.unwrap_or(true);
            Ok(Observed::Table(engine!(table.sort_by(&key_names()?, ascending))?))
        }
        FixtureOperation::CorrMatrix => {
            Ok(Observed::Table(engine!(corr_matrix(&table()?, method()?))?))
        }
        FixtureOperation::Correlation => {
            let (a, b) = column_pair(fixture)?;
            let r = engine!(correlation(&table()?, a, b, method()?))?;
            Ok(Observed::Numbers(BTreeMap::from([("r".to_owned(), r)])))
        }
        FixtureOperation::RollingMean => {
            let window = *required(&fixture.window, "window", op)?;
            Ok(Observed::Table(engine!(rolling_mean(&table()?, window))?))
        }
        FixtureOperation::LinearRegression => {
            let table = table()?;
            let (x, y) = column_pair(fixture)?;
            let fit = engine!(linear_regression(
                &engine!(column_sample(&table, x))?,
                &engine!(column_sample(&table, y))?,
            ))?;
            Ok(Observed::Numbers(BTreeMap::from([
                ("slope".to_owned(), fit.slope),
                ("intercept".to_owned(), fit.intercept),
                ("r_squared".to_owned(), fit.r_squared),
            ])))
        }
        FixtureOperation::TTest => {
            let table = table()?;
            let (a, b) = column_pair(fixture)?;
            let variant = match fixture.method.as_deref() {
                None | Some("pooled") => TTestVariant::Pooled,
                Some("welch") => TTestVariant::Welch,
                Some(other) => {
                    return Err(ExecFailure::Fixture(format!("unknown t-test variant '{other}'")));
                }
            };
            let result = engine!(t_test_two_sample(
                &engine!(column_sample(&table, a))?,
                &engine!(column_sample(&table, b))?,
                variant,
                lf_inference::Alternative::TwoSided,
            ))?;
            Ok(Observed::Numbers(BTreeMap::from([
                ("statistic".to_owned(), result.statistic),
                ("p_value".to_owned(), result.p_value),
                ("df".to_owned(), result.df),
                ("mean_a".to_owned(), result.mean_a),
                ("mean_b".to_owned(), result.mean_b),
            ])))
        }
        FixtureOperation::ChiSquare => {
            let (a, b) = column_pair(fixture)?;
            let result = engine!(chi_square_independence(&table()?, a, b))?;
            Ok(Observed::Numbers(BTreeMap::from([
                ("statistic".to_owned(), result.statistic),
                ("p_value".to_owned(), result.p_value),
                ("df".to_owned(), result.df as f64),
            ])))
        }
    }
}

// ── Comparison ─────────────────────────────────────────────────────────

fn check_fixture(config: &HarnessConfig, fixture: &CaseFixture) -> Result<(), String> {
    let observed = match execute(fixture) {
        Ok(observed) => observed,
        Err(ExecFailure::Fixture(message)) => return Err(format!("malformed fixture: {message}")),
        Err(ExecFailure::Engine { kind, message }) => {
            return match fixture.expected_error {
                Some(expected) if expected == kind => Ok(()),
                Some(expected) => Err(format!(
                    "expected error {expected:?}, got {kind:?}: {message}"
                )),
                None => Err(format!("unexpected error {kind:?}: {message}")),
            };
        }
    };

    if let Some(expected) = fixture.expected_error {
        return Err(format!("expected error {expected:?}, but the operation succeeded"));
    }

    let tolerance = config.tolerance;
    let mut checked = false;
    match &observed {
        Observed::Numbers(actual) => {
            if let Some(expected) = &fixture.expected_numbers {
                compare_numbers(actual, expected, tolerance)?;
                checked = true;
            }
        }
        Observed::Table(actual) => {
            if let Some(expected) = &fixture.expected_table {
                compare_table(actual, expected, tolerance)?;
                checked = true;
            }
            if let Some(len) = fixture.expected_len {
                compare_len(actual.len(), len)?;
                checked = true;
            }
        }
        Observed::Groups(actual) => {
            if let Some(expected) = &fixture.expected_groups {
                compare_groups(actual, expected)?;
                checked = true;
            }
            if let Some(len) = fixture.expected_len {
                compare_len(actual.len(), len)?;
                checked = true;
            }
        }
    }

    if !checked {
        return Err(format!(
            "no expectation applies to {} output",
            fixture.operation.operation_name()
        ));
    }
    Ok(())
}

fn compare_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual != expected {
        return Err(format!("length mismatch: actual={actual}, expected={expected}"));
    }
    Ok(())
}

fn approx_eq(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual.is_nan() && expected.is_nan()) || (actual - expected).abs() <= tolerance
}

fn compare_numbers(
    actual: &BTreeMap<String, f64>,
    expected: &BTreeMap<String, f64>,
    tolerance: f64,
) -> Result<(), String> {
    for (name, want) in expected {
        let Some(got) = actual.get(name) else {
            return Err(format!("statistic '{name}' is not produced by this operation"));
        };
        if !approx_eq(*got, *want, tolerance) {
            return Err(format!("statistic '{name}' mismatch: actual={got}, expected={want}"));
        }
    }
    Ok(())
}

fn scalars_match(actual: &Scalar, expected: &Scalar, tolerance: f64) -> bool {
    match (actual.as_number(), expected.as_number()) {
        (Some(a), Some(e)) => approx_eq(a, e, tolerance),
        _ => actual.semantic_eq(expected),
    }
}

fn compare_table(
    actual: &LabeledTable,
    expected: &FixtureTable,
    tolerance: f64,
) -> Result<(), String> {
    if let Some(labels) = &expected.index
        && actual.index() != &Index::new(labels.clone())
    {
        return Err(format!(
            "index mismatch: actual={:?}, expected={labels:?}",
            actual.index().labels()
        ));
    }

    let expected_names: Vec<&str> = expected.columns.iter().map(|c| c.name.as_str()).collect();
    if actual.column_names() != expected_names.as_slice() {
        return Err(format!(
            "column mismatch: actual={:?}, expected={expected_names:?}",
            actual.column_names()
        ));
    }

    for column in &expected.columns {
        let values = actual
            .column_values(&column.name)
            .map_err(|err| err.to_string())?
            .values();
        if values.len() != column.values.len() {
            return Err(format!(
                "column '{}' length mismatch: actual={}, expected={}",
                column.name,
                values.len(),
                column.values.len()
            ));
        }
        for (idx, (got, want)) in values.iter().zip(&column.values).enumerate() {
            if !scalars_match(got, want, tolerance) {
                return Err(format!(
                    "column '{}' mismatch at idx={idx}: actual={got:?}, expected={want:?}",
                    column.name
                ));
            }
        }
    }
    Ok(())
}

fn compare_groups(actual: &[FixtureGroup], expected: &[FixtureGroup]) -> Result<(), String> {
    compare_len(actual.len(), expected.len()).map_err(|err| format!("group count {err}"))?;
    for (got, want) in actual.iter().zip(expected) {
        let same_key = got.key.len() == want.key.len()
            && got.key.iter().zip(&want.key).all(|(a, b)| a.semantic_eq(b));
        if !same_key || got.rows != want.rows {
            return Err(format!(
                "group mismatch: actual={:?} rows={:?}, expected={:?} rows={:?}",
                got.key, got.rows, want.key, want.rows
            ));
        }
    }
    Ok(())
}
