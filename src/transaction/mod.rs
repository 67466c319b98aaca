//! Transaction engine
//!
//! Drives a validated [`RequestDescriptor`] through a fixed, operation-specific
//! sequence of phases. Phases execute strictly in order; the only control-flow
//! exception is the breakpoint: before executing a phase, the engine halts if
//! the phase lies at or after the requested breakpoint, and whatever state has
//! accumulated so far becomes the output. Partial results are a debugging
//! feature, not an error path.

mod phases;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AuguryError, Result};
use crate::model::ModelArtifact;
use crate::output::OutputResult;
use crate::request::{OperationKind, RequestDescriptor};
use crate::storage::ModelStorage;

/// One stage of transaction execution. The variants form a single total
/// order; each operation kind runs the subset that applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    DataAnalysis,
    DataPreparation,
    ModelTraining,
    ModelValidation,
    Inference,
    /// Terminal marker; also the default breakpoint ("run to completion").
    Complete,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::DataAnalysis => "data_analysis",
            Phase::DataPreparation => "data_preparation",
            Phase::ModelTraining => "model_training",
            Phase::ModelValidation => "model_validation",
            Phase::Inference => "inference",
            Phase::Complete => "complete",
        }
    }

    /// Ordered phases of a LEARN transaction.
    pub fn learn_plan() -> &'static [Phase] {
        &[
            Phase::DataAnalysis,
            Phase::DataPreparation,
            Phase::ModelTraining,
            Phase::ModelValidation,
        ]
    }

    /// Ordered phases of a PREDICT transaction.
    pub fn predict_plan() -> &'static [Phase] {
        &[Phase::DataPreparation, Phase::Inference]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Phase {
    type Err = AuguryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "data_analysis" => Ok(Phase::DataAnalysis),
            "data_preparation" => Ok(Phase::DataPreparation),
            "model_training" => Ok(Phase::ModelTraining),
            "model_validation" => Ok(Phase::ModelValidation),
            "inference" => Ok(Phase::Inference),
            "complete" => Ok(Phase::Complete),
            other => Err(AuguryError::ValidationError(format!(
                "unknown phase: {other}"
            ))),
        }
    }
}

/// Data produced by the preparation phase and consumed by later ones.
#[derive(Debug)]
pub(crate) struct PreparedData {
    /// One sub-frame per group, sorted along the time axis when applicable.
    pub groups: BTreeMap<String, DataFrame>,
    pub feature_columns: Vec<String>,
    pub total_rows: usize,
}

/// One execution of a LEARN or PREDICT operation.
///
/// Owns its descriptor, accumulates intermediate state as phases run, and is
/// consumed by [`Transaction::run`].
pub struct Transaction {
    pub(crate) descriptor: RequestDescriptor,
    pub(crate) storage: ModelStorage,
    pub(crate) prepared: Option<PreparedData>,
    /// Per-group holdout frames reserved during training for validation.
    pub(crate) holdout: BTreeMap<String, DataFrame>,
    pub(crate) artifact: Option<ModelArtifact>,
    pub(crate) result: OutputResult,
}

impl Transaction {
    pub fn new(descriptor: RequestDescriptor, storage: ModelStorage) -> Self {
        let result = OutputResult::empty(descriptor.kind, &descriptor.model_name);
        Self {
            descriptor,
            storage,
            prepared: None,
            holdout: BTreeMap::new(),
            artifact: None,
            result,
        }
    }

    /// Execute the phase plan, honoring the breakpoint, and assemble the
    /// output result.
    pub fn run(mut self) -> Result<OutputResult> {
        let plan = match self.descriptor.kind {
            OperationKind::Learn => Phase::learn_plan(),
            OperationKind::Predict => Phase::predict_plan(),
        };

        for &phase in plan {
            if phase >= self.descriptor.breakpoint {
                debug!(phase = %phase, breakpoint = %self.descriptor.breakpoint, "halting at breakpoint");
                self.result.stopped_at = phase;
                self.result.completed = false;
                return Ok(self.result);
            }
            info!(phase = %phase, model = %self.descriptor.model_name, "executing phase");
            self.execute(phase)?;
        }

        self.result.stopped_at = Phase::Complete;
        self.result.completed = true;
        Ok(self.result)
    }

    fn execute(&mut self, phase: Phase) -> Result<()> {
        match (self.descriptor.kind, phase) {
            (OperationKind::Learn, Phase::DataAnalysis) => self.phase_data_analysis(),
            (OperationKind::Learn, Phase::DataPreparation) => self.phase_prepare_learn(),
            (OperationKind::Learn, Phase::ModelTraining) => self.phase_train(),
            (OperationKind::Learn, Phase::ModelValidation) => self.phase_validate(),
            (OperationKind::Predict, Phase::DataPreparation) => self.phase_prepare_predict(),
            (OperationKind::Predict, Phase::Inference) => self.phase_infer(),
            (kind, phase) => Err(AuguryError::PhaseError {
                phase: phase.label().to_string(),
                message: format!("phase not part of the {kind:?} plan"),
            }),
        }
    }

    /// Record an isolated failure without aborting sibling groups.
    pub(crate) fn note(
        &mut self,
        phase: Phase,
        group: Option<String>,
        target: Option<String>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        tracing::warn!(phase = %phase, ?group, ?target, "{message}");
        self.result.notes.push(crate::output::PhaseNote {
            phase,
            group,
            target,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_total_order() {
        assert!(Phase::DataAnalysis < Phase::DataPreparation);
        assert!(Phase::DataPreparation < Phase::ModelTraining);
        assert!(Phase::ModelTraining < Phase::ModelValidation);
        assert!(Phase::ModelValidation < Phase::Inference);
        assert!(Phase::Inference < Phase::Complete);
    }

    #[test]
    fn test_phase_label_roundtrip() {
        for phase in [
            Phase::DataAnalysis,
            Phase::DataPreparation,
            Phase::ModelTraining,
            Phase::ModelValidation,
            Phase::Inference,
            Phase::Complete,
        ] {
            assert_eq!(phase.label().parse::<Phase>().unwrap(), phase);
        }
        assert!("bogus".parse::<Phase>().is_err());
    }

    #[test]
    fn test_plans_are_ordered_subsets() {
        let learn = Phase::learn_plan();
        assert!(learn.windows(2).all(|w| w[0] < w[1]));
        let predict = Phase::predict_plan();
        assert!(predict.windows(2).all(|w| w[0] < w[1]));
    }
}
