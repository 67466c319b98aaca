//! Output result assembly
//!
//! The terminal artifact of a transaction. Tagged with the phase at which
//! execution stopped so consumers can tell a full result from a
//! breakpoint-truncated one; per-group phase failures are carried as notes,
//! not raised as errors, preserving partial results for debugging.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::RegressionMetrics;
use crate::request::OperationKind;
use crate::sampling::Sufficiency;
use crate::transaction::Phase;

/// Per-column statistics from the data analysis phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub dtype: String,
    pub count: usize,
    pub null_count: usize,
    pub distinct: Option<usize>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Summary of the prepared data a transaction worked on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparationSummary {
    pub total_rows: usize,
    pub group_count: usize,
    pub feature_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
}

/// Validation outcome for one predicted column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetValidation {
    pub overall: RegressionMetrics,
    pub per_group: BTreeMap<String, RegressionMetrics>,
    pub sufficiency: Sufficiency,
}

/// One predicted value with its confidence interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Rendered group key, when the model is grouped.
    pub group: Option<String>,
    /// Predicted column, under its originally requested label.
    pub column: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub sufficiency: Sufficiency,
}

/// A failure local to one phase (and usually one group), recorded instead of
/// raised so sibling groups keep running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseNote {
    pub phase: Phase,
    pub group: Option<String>,
    pub target: Option<String>,
    pub message: String,
}

/// The terminal artifact returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResult {
    pub kind: OperationKind,
    pub model_name: String,
    /// The phase at which execution stopped: `Complete`, or the breakpoint
    /// phase that was not executed.
    pub stopped_at: Phase,
    pub completed: bool,
    pub column_stats: Option<BTreeMap<String, ColumnStats>>,
    /// Sufficiency of the analysis sample, when analysis ran.
    pub stats_sufficiency: Option<Sufficiency>,
    pub preparation: Option<PreparationSummary>,
    pub validation: Option<BTreeMap<String, TargetValidation>>,
    pub predictions: Option<Vec<Prediction>>,
    pub notes: Vec<PhaseNote>,
}

impl OutputResult {
    pub(crate) fn empty(kind: OperationKind, model_name: &str) -> Self {
        Self {
            kind,
            model_name: model_name.to_string(),
            stopped_at: Phase::Complete,
            completed: false,
            column_stats: None,
            stats_sufficiency: None,
            preparation: None,
            validation: None,
            predictions: None,
            notes: Vec::new(),
        }
    }

    /// True when the result was truncated by a breakpoint.
    pub fn is_truncated(&self) -> bool {
        !self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_truncated() {
        let result = OutputResult::empty(OperationKind::Learn, "m");
        assert!(result.is_truncated());
        assert!(result.predictions.is_none());
    }

    #[test]
    fn test_result_serializes() {
        let mut result = OutputResult::empty(OperationKind::Predict, "m");
        result.predictions = Some(vec![Prediction {
            group: Some("a".to_string()),
            column: "sales".to_string(),
            value: 1.5,
            lower: 1.0,
            upper: 2.0,
            sufficiency: Sufficiency::Confident,
        }]);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"sales\""));
        assert!(json.contains("confident"));
    }
}
