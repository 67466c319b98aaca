//! Request normalization
//!
//! Turns loosely-typed caller input into a validated [`RequestDescriptor`]:
//! - scalar-or-list arguments are collapsed to ordered sequences,
//! - order-by entries are coerced to `(column, ascending)` keys,
//! - logical column names are resolved against the source table,
//! - sampling parameters and the window size are validated.
//!
//! Construction is side-effect free: no storage is touched and no transaction
//! exists until a descriptor has been fully validated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{DEFAULT_MODEL_NAME, DEFAULT_WINDOW_SIZE, EngineConfig};
use crate::data::{DataSource, SourceInput};
use crate::error::{AuguryError, Result};
use crate::sampling::SamplingTolerance;
use crate::transaction::Phase;

/// A value that may arrive as a bare scalar or as a list.
///
/// Collapsed to a canonical `Vec` the moment it crosses the request boundary.
#[derive(Debug, Clone)]
pub enum ScalarOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> ScalarOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            ScalarOrMany::One(value) => vec![value],
            ScalarOrMany::Many(values) => values,
        }
    }
}

impl<T> From<Vec<T>> for ScalarOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        ScalarOrMany::Many(values)
    }
}

impl From<&str> for ScalarOrMany<String> {
    fn from(value: &str) -> Self {
        ScalarOrMany::One(value.to_string())
    }
}

impl From<String> for ScalarOrMany<String> {
    fn from(value: String) -> Self {
        ScalarOrMany::One(value)
    }
}

impl From<Vec<&str>> for ScalarOrMany<String> {
    fn from(values: Vec<&str>) -> Self {
        ScalarOrMany::Many(values.into_iter().map(|s| s.to_string()).collect())
    }
}

/// One entry of a caller-supplied `order_by`: either a bare column name
/// (ascending by default) or an explicit `(column, ascending)` pair.
#[derive(Debug, Clone)]
pub enum OrderInput {
    Column(String),
    Directed(String, bool),
}

impl OrderInput {
    fn into_key(self) -> OrderKey {
        match self {
            OrderInput::Column(column) => OrderKey {
                column,
                ascending: true,
            },
            OrderInput::Directed(column, ascending) => OrderKey { column, ascending },
        }
    }
}

impl From<&str> for OrderInput {
    fn from(column: &str) -> Self {
        OrderInput::Column(column.to_string())
    }
}

impl From<String> for OrderInput {
    fn from(column: String) -> Self {
        OrderInput::Column(column)
    }
}

impl From<(&str, bool)> for OrderInput {
    fn from((column, ascending): (&str, bool)) -> Self {
        OrderInput::Directed(column.to_string(), ascending)
    }
}

impl From<(String, bool)> for OrderInput {
    fn from((column, ascending): (String, bool)) -> Self {
        OrderInput::Directed(column, ascending)
    }
}

impl From<&str> for ScalarOrMany<OrderInput> {
    fn from(column: &str) -> Self {
        ScalarOrMany::One(OrderInput::from(column))
    }
}

impl From<(&str, bool)> for ScalarOrMany<OrderInput> {
    fn from(pair: (&str, bool)) -> Self {
        ScalarOrMany::One(OrderInput::from(pair))
    }
}

/// A normalized time-axis key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub column: String,
    pub ascending: bool,
}

/// A single constraint value inside a `when` scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WhenValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl WhenValue {
    /// Numeric view of the value, used to feed model features.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WhenValue::Float(v) => Some(*v),
            WhenValue::Int(v) => Some(*v as f64),
            WhenValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            WhenValue::Text(v) => v.parse::<f64>().ok(),
        }
    }

    /// String view of the value, used to address time-series groups.
    pub fn render(&self) -> String {
        match self {
            WhenValue::Float(v) => format!("{v}"),
            WhenValue::Int(v) => format!("{v}"),
            WhenValue::Bool(v) => format!("{v}"),
            WhenValue::Text(v) => v.clone(),
        }
    }
}

impl From<f64> for WhenValue {
    fn from(v: f64) -> Self {
        WhenValue::Float(v)
    }
}

impl From<i64> for WhenValue {
    fn from(v: i64) -> Self {
        WhenValue::Int(v)
    }
}

impl From<i32> for WhenValue {
    fn from(v: i32) -> Self {
        WhenValue::Int(v as i64)
    }
}

impl From<bool> for WhenValue {
    fn from(v: bool) -> Self {
        WhenValue::Bool(v)
    }
}

impl From<&str> for WhenValue {
    fn from(v: &str) -> Self {
        WhenValue::Text(v.to_string())
    }
}

/// One prediction scenario: column -> constrained value.
pub type WhenScenario = BTreeMap<String, WhenValue>;

/// Build a scenario from `(column, value)` pairs.
pub fn scenario<K, V, I>(pairs: I) -> WhenScenario
where
    K: Into<String>,
    V: Into<WhenValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// The scenario constraint of a PREDICT request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhenConditions {
    /// No constraint: predict from the supplied data alone.
    Unconstrained,
    /// One or more scenarios to predict for.
    Scenarios(Vec<WhenScenario>),
}

/// Which pipeline a transaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Learn,
    Predict,
}

/// Caller-facing LEARN request, mirroring the controller call surface.
#[derive(Debug)]
pub struct LearnRequest {
    predict: Vec<String>,
    from_data: SourceInput,
    model_name: Option<String>,
    test_from_data: Option<SourceInput>,
    group_by: Vec<String>,
    order_by: Vec<OrderInput>,
    window_size: Option<usize>,
    sample_margin_of_error: Option<f64>,
    sample_confidence_level: Option<f64>,
    breakpoint: Option<Phase>,
    ignore_columns: Vec<String>,
    rename_strange_columns: bool,
}

impl LearnRequest {
    pub fn new(predict: impl Into<ScalarOrMany<String>>, from_data: impl Into<SourceInput>) -> Self {
        Self {
            predict: predict.into().into_vec(),
            from_data: from_data.into(),
            model_name: None,
            test_from_data: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            window_size: None,
            sample_margin_of_error: None,
            sample_confidence_level: None,
            breakpoint: None,
            ignore_columns: Vec::new(),
            rename_strange_columns: false,
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn with_test_data(mut self, test_from_data: impl Into<SourceInput>) -> Self {
        self.test_from_data = Some(test_from_data.into());
        self
    }

    pub fn with_group_by(mut self, group_by: impl Into<ScalarOrMany<String>>) -> Self {
        self.group_by = group_by.into().into_vec();
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<ScalarOrMany<OrderInput>>) -> Self {
        self.order_by = order_by.into().into_vec();
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = Some(window_size);
        self
    }

    pub fn with_sample_margin_of_error(mut self, margin_of_error: f64) -> Self {
        self.sample_margin_of_error = Some(margin_of_error);
        self
    }

    pub fn with_sample_confidence_level(mut self, confidence_level: f64) -> Self {
        self.sample_confidence_level = Some(confidence_level);
        self
    }

    /// Halt the transaction before this phase executes. Debugging feature.
    pub fn with_breakpoint(mut self, phase: Phase) -> Self {
        self.breakpoint = Some(phase);
        self
    }

    pub fn with_ignore_columns(mut self, ignore: impl Into<ScalarOrMany<String>>) -> Self {
        self.ignore_columns = ignore.into().into_vec();
        self
    }

    /// Legacy behavior: remap special characters in column labels instead of
    /// resolving the requested names against the table.
    pub fn with_rename_strange_columns(mut self, rename: bool) -> Self {
        self.rename_strange_columns = rename;
        self
    }

    pub(crate) fn into_parts(self) -> (SourceInput, Option<SourceInput>, LearnRequestParts) {
        let parts = LearnRequestParts {
            predict: self.predict,
            model_name: self.model_name,
            group_by: self.group_by,
            order_by: self.order_by,
            window_size: self.window_size,
            sample_margin_of_error: self.sample_margin_of_error,
            sample_confidence_level: self.sample_confidence_level,
            breakpoint: self.breakpoint,
            ignore_columns: self.ignore_columns,
            rename_strange_columns: self.rename_strange_columns,
        };
        (self.from_data, self.test_from_data, parts)
    }
}

/// The non-source fields of a learn request, after the sources are acquired.
pub(crate) struct LearnRequestParts {
    pub predict: Vec<String>,
    pub model_name: Option<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderInput>,
    pub window_size: Option<usize>,
    pub sample_margin_of_error: Option<f64>,
    pub sample_confidence_level: Option<f64>,
    pub breakpoint: Option<Phase>,
    pub ignore_columns: Vec<String>,
    pub rename_strange_columns: bool,
}

/// Caller-facing PREDICT request.
#[derive(Debug, Default)]
pub struct PredictRequest {
    model_name: Option<String>,
    when: Vec<WhenScenario>,
    when_data: Option<SourceInput>,
    breakpoint: Option<Phase>,
}

impl PredictRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    /// Add one scenario to predict for.
    pub fn with_when(mut self, scenario: WhenScenario) -> Self {
        self.when.push(scenario);
        self
    }

    /// Replace the scenario list wholesale.
    pub fn with_when_scenarios(mut self, scenarios: Vec<WhenScenario>) -> Self {
        self.when = scenarios;
        self
    }

    /// Supply observed rows (time-series readings) to predict from.
    pub fn with_when_data(mut self, when_data: impl Into<SourceInput>) -> Self {
        self.when_data = Some(when_data.into());
        self
    }

    pub fn with_breakpoint(mut self, phase: Phase) -> Self {
        self.breakpoint = Some(phase);
        self
    }

    pub(crate) fn into_parts(self) -> (Option<SourceInput>, PredictRequestParts) {
        let parts = PredictRequestParts {
            model_name: self.model_name,
            when: self.when,
            breakpoint: self.breakpoint,
        };
        (self.when_data, parts)
    }
}

pub(crate) struct PredictRequestParts {
    pub model_name: Option<String>,
    pub when: Vec<WhenScenario>,
    pub breakpoint: Option<Phase>,
}

/// A normalized, validated description of one learn or predict operation.
///
/// Immutable after construction; owned exclusively by the transaction built
/// for it.
#[derive(Debug)]
pub struct RequestDescriptor {
    pub kind: OperationKind,
    pub model_name: String,
    /// Predict columns as present in the source table.
    pub predict_columns: Vec<String>,
    /// Resolved/sanitized label -> originally requested label. Both ends of
    /// every alias are preserved end-to-end.
    pub column_aliases: HashMap<String, String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderKey>,
    pub is_time_series: bool,
    pub window_size: usize,
    pub sampling: SamplingTolerance,
    pub ignore_columns: BTreeSet<String>,
    pub breakpoint: Phase,
    pub when_conditions: WhenConditions,
    pub source: Option<DataSource>,
    pub test_source: Option<DataSource>,
}

impl RequestDescriptor {
    /// Normalize and validate a LEARN request against its acquired sources.
    pub(crate) fn for_learn(
        parts: LearnRequestParts,
        source: DataSource,
        test_source: Option<DataSource>,
        defaults: &EngineConfig,
    ) -> Result<Self> {
        if parts.predict.is_empty() || parts.predict.iter().all(|c| c.is_empty()) {
            return Err(AuguryError::ValidationError(
                "you need to specify a column to predict".to_string(),
            ));
        }

        let window_size = parts.window_size.unwrap_or(DEFAULT_WINDOW_SIZE);
        if window_size == 0 {
            return Err(AuguryError::ValidationError(
                "window size must be a positive integer".to_string(),
            ));
        }

        let sampling = SamplingTolerance::new(
            parts
                .sample_margin_of_error
                .unwrap_or(defaults.margin_of_error),
            parts
                .sample_confidence_level
                .unwrap_or(defaults.confidence_level),
        )?;

        let order_by: Vec<OrderKey> = parts
            .order_by
            .into_iter()
            .map(OrderInput::into_key)
            .collect();
        let is_time_series = !order_by.is_empty();

        // Resolve the grouping and time-axis columns; these must exist.
        let group_by = parts
            .group_by
            .iter()
            .map(|c| source.resolve_column(c))
            .collect::<Result<Vec<String>>>()?;
        let order_by = order_by
            .into_iter()
            .map(|key| {
                let column = source.resolve_column(&key.column)?;
                Ok(OrderKey {
                    column,
                    ascending: key.ascending,
                })
            })
            .collect::<Result<Vec<OrderKey>>>()?;

        let mut column_aliases: HashMap<String, String> = HashMap::new();
        let mut predict_columns: Vec<String> = Vec::new();

        if parts.rename_strange_columns {
            warn!(
                "rename_strange_columns is deprecated: column labels with special \
                 characters are supported directly and the default is now false"
            );
            column_aliases.extend(
                source
                    .alias_map()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            for requested in &parts.predict {
                // Lenient path: keep the requested label when it cannot be
                // resolved, the aliased frame is expected to carry it.
                let resolved = source
                    .resolve_column(requested)
                    .unwrap_or_else(|_| requested.clone());
                if !predict_columns.contains(&resolved) {
                    predict_columns.push(resolved);
                }
            }
        } else {
            for requested in &parts.predict {
                let resolved = source.resolve_column(requested)?;
                column_aliases.insert(resolved.clone(), requested.clone());
                if !predict_columns.contains(&resolved) {
                    predict_columns.push(resolved);
                }
            }
        }

        // Ignored columns that are not present are simply skipped.
        let ignore_columns: BTreeSet<String> = parts
            .ignore_columns
            .iter()
            .filter_map(|c| source.resolve_column(c).ok())
            .collect();

        Ok(Self {
            kind: OperationKind::Learn,
            model_name: parts
                .model_name
                .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            predict_columns,
            column_aliases,
            group_by,
            order_by,
            is_time_series,
            window_size,
            sampling,
            ignore_columns,
            breakpoint: parts.breakpoint.unwrap_or(Phase::Complete),
            when_conditions: WhenConditions::Unconstrained,
            source: Some(source),
            test_source,
        })
    }

    /// Normalize a PREDICT request. Model-derived fields (predict columns,
    /// grouping, window) are filled in from the stored artifact during the
    /// data preparation phase.
    pub(crate) fn for_predict(
        parts: PredictRequestParts,
        when_source: Option<DataSource>,
        defaults: &EngineConfig,
    ) -> Result<Self> {
        let when_conditions = if parts.when.is_empty() {
            WhenConditions::Unconstrained
        } else {
            WhenConditions::Scenarios(parts.when)
        };

        let sampling = SamplingTolerance::new(defaults.margin_of_error, defaults.confidence_level)?;

        Ok(Self {
            kind: OperationKind::Predict,
            model_name: parts
                .model_name
                .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            predict_columns: Vec::new(),
            column_aliases: HashMap::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            is_time_series: false,
            window_size: DEFAULT_WINDOW_SIZE,
            sampling,
            ignore_columns: BTreeSet::new(),
            breakpoint: parts.breakpoint.unwrap_or(Phase::Complete),
            when_conditions,
            source: when_source,
            test_source: None,
        })
    }
}
