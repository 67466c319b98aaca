//! Augury - learn/predict transaction engine
//!
//! This crate orchestrates the lifecycle of model training ("learn") and
//! inference ("predict") requests against tabular and time-series data:
//! - [`session`] - externally facing controller, one entry point per operation
//! - [`request`] - normalization of loose caller input into validated descriptors
//! - [`transaction`] - the phase state machine driving each operation
//! - [`data`] - file/frame/URL acquisition into a uniform tabular source
//! - [`timeseries`] - group partitioning, time-axis ordering, trailing windows
//! - [`sampling`] - margin-of-error / confidence-level sufficiency checks
//! - [`model`] - per-group estimators and persisted artifacts
//! - [`storage`] - model artifact persistence
//! - [`output`] - terminal results, tagged with the phase execution stopped at
//! - [`telemetry`] - best-effort background update check
//! - [`cli`] - command-line interface

// Core error handling
pub mod error;

// Configuration and defaults
pub mod config;

// Data acquisition
pub mod data;

// Request normalization
pub mod request;

// Statistical sufficiency
pub mod sampling;

// Time-series plumbing
pub mod timeseries;

// Models and artifacts
pub mod model;
pub mod storage;

// The transaction engine
pub mod output;
pub mod transaction;

// Controller and infrastructure
pub mod session;
pub mod telemetry;
pub mod cli;

pub use error::{AuguryError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{AuguryError, Result};

    // Configuration
    pub use crate::config::EngineConfig;

    // Session API
    pub use crate::session::Session;

    // Requests
    pub use crate::request::{
        scenario, LearnRequest, OperationKind, OrderInput, OrderKey, PredictRequest,
        ScalarOrMany, WhenConditions, WhenScenario, WhenValue,
    };

    // Data sources
    pub use crate::data::{DataSource, SourceInput};

    // Transactions
    pub use crate::transaction::{Phase, Transaction};

    // Sampling
    pub use crate::sampling::{SamplingTolerance, Sufficiency};

    // Models
    pub use crate::model::{GroupModel, ModelArtifact, RegressionMetrics, TargetModel};
    pub use crate::storage::ModelStorage;

    // Results
    pub use crate::output::{OutputResult, PhaseNote, Prediction};
}
