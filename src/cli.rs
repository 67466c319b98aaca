//! Command-line interface
//!
//! Thin wrapper over the [`Session`](crate::session::Session) API: `learn`,
//! `predict` and `models` subcommands, with results printed as pretty JSON.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::EngineConfig;
use crate::error::{AuguryError, Result};
use crate::request::{LearnRequest, OrderInput, PredictRequest, WhenScenario, WhenValue};
use crate::session::Session;
use crate::transaction::Phase;

#[derive(Parser)]
#[command(name = "augury", version, about = "Learn/predict engine for tabular and time-series data")]
pub struct Cli {
    /// Storage directory for trained models
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Skip the background update check
    #[arg(long, global = true)]
    pub no_update_check: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model from a data file or URL
    Learn {
        /// Path or URL of the training data
        data: String,
        /// Column(s) to predict
        #[arg(long, required = true, num_args = 1..)]
        predict: Vec<String>,
        /// Model name
        #[arg(long, default_value = crate::config::DEFAULT_MODEL_NAME)]
        model: String,
        /// Separate test data file
        #[arg(long)]
        test_data: Option<String>,
        /// Group rows into independent time-series by these columns
        #[arg(long, num_args = 1..)]
        group_by: Vec<String>,
        /// Time axis: "column" or "column:desc"
        #[arg(long, num_args = 1..)]
        order_by: Vec<String>,
        /// Trailing samples per time-series step
        #[arg(long)]
        window_size: Option<usize>,
        /// Sampling margin of error
        #[arg(long)]
        margin_of_error: Option<f64>,
        /// Sampling confidence level
        #[arg(long)]
        confidence_level: Option<f64>,
        /// Columns to exclude from all processing
        #[arg(long, num_args = 1..)]
        ignore: Vec<String>,
        /// Halt before this phase (debugging)
        #[arg(long)]
        breakpoint: Option<String>,
    },
    /// Predict with a trained model
    Predict {
        /// Model name
        #[arg(long, default_value = crate::config::DEFAULT_MODEL_NAME)]
        model: String,
        /// Scenario constraints as column=value pairs
        #[arg(long, num_args = 1..)]
        when: Vec<String>,
        /// Observed readings (time-series predictions)
        #[arg(long)]
        when_data: Option<String>,
    },
    /// List stored models
    Models,
}

fn parse_order_by(raw: &[String]) -> Vec<OrderInput> {
    raw.iter()
        .map(|entry| match entry.rsplit_once(':') {
            Some((column, "desc")) => OrderInput::Directed(column.to_string(), false),
            Some((column, "asc")) => OrderInput::Directed(column.to_string(), true),
            _ => OrderInput::Column(entry.clone()),
        })
        .collect()
}

fn parse_when(raw: &[String]) -> Result<WhenScenario> {
    let mut scenario = WhenScenario::new();
    for pair in raw {
        let (column, value) = pair.split_once('=').ok_or_else(|| {
            AuguryError::ValidationError(format!("when condition must be column=value, got {pair}"))
        })?;
        let value = match value.parse::<f64>() {
            Ok(number) => WhenValue::Float(number),
            Err(_) => WhenValue::Text(value.to_string()),
        };
        scenario.insert(column.to_string(), value);
    }
    Ok(scenario)
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.storage {
        Some(path) => EngineConfig::with_storage_path(path),
        None => EngineConfig::default(),
    };
    if cli.no_update_check {
        config = config.without_update_check();
    }
    let session = Session::new(config)?;

    match cli.command {
        Commands::Learn {
            data,
            predict,
            model,
            test_data,
            group_by,
            order_by,
            window_size,
            margin_of_error,
            confidence_level,
            ignore,
            breakpoint,
        } => {
            let mut request = LearnRequest::new(predict, data.as_str()).with_model_name(model);
            if let Some(test_data) = test_data {
                request = request.with_test_data(test_data.as_str());
            }
            if !group_by.is_empty() {
                request = request.with_group_by(group_by);
            }
            if !order_by.is_empty() {
                request = request.with_order_by(parse_order_by(&order_by));
            }
            if let Some(window_size) = window_size {
                request = request.with_window_size(window_size);
            }
            if let Some(margin_of_error) = margin_of_error {
                request = request.with_sample_margin_of_error(margin_of_error);
            }
            if let Some(confidence_level) = confidence_level {
                request = request.with_sample_confidence_level(confidence_level);
            }
            if !ignore.is_empty() {
                request = request.with_ignore_columns(ignore);
            }
            if let Some(breakpoint) = breakpoint {
                request = request.with_breakpoint(breakpoint.parse::<Phase>()?);
            }

            let result = session.learn(request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Predict {
            model,
            when,
            when_data,
        } => {
            let mut request = PredictRequest::new().with_model_name(model);
            if !when.is_empty() {
                request = request.with_when(parse_when(&when)?);
            }
            if let Some(when_data) = when_data {
                request = request.with_when_data(when_data.as_str());
            }

            let result = session.predict(request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Models => {
            for name in session.models()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

/// Log-and-return wrapper for `main`.
pub fn run_logged(cli: Cli) -> Result<()> {
    run(cli).inspect_err(|e| error!("{e}"))
}
