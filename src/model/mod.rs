//! Model fitting and persisted artifacts
//!
//! The transaction engine treats the concrete estimator as a seam: what it
//! needs is a per-group fit that can score a feature row and report its own
//! uncertainty. The default estimator is a least-squares linear fit over the
//! numeric feature columns; the persisted [`ModelArtifact`] carries one
//! [`GroupModel`] per time-series group per predicted column, plus enough of
//! the request descriptor to rebuild prediction inputs later.

mod linear;
mod metrics;

pub use metrics::RegressionMetrics;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AuguryError, Result};
use crate::request::OrderKey;
use crate::sampling::{SamplingTolerance, Sufficiency};

/// One fitted estimator: a linear fit plus the statistics needed to score
/// new rows and to bound the estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// Mean of each feature over the training rows; fills features a
    /// prediction scenario does not constrain.
    pub feature_means: Vec<f64>,
    /// Standard deviation of the training residuals; drives the confidence
    /// bounds reported with each prediction.
    pub residual_std: f64,
    pub n_samples: usize,
    /// Whether the training sample satisfied the sampling tolerance.
    pub sufficiency: Sufficiency,
}

impl GroupModel {
    /// Fit on a feature matrix and target vector.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, sufficiency: Sufficiency) -> Result<Self> {
        let (weights, intercept) = linear::fit_least_squares(x, y).ok_or_else(|| {
            AuguryError::DataError("least-squares fit failed: no rows".to_string())
        })?;

        let n = x.nrows();
        let d = x.ncols();
        let feature_means: Vec<f64> = (0..d)
            .map(|c| x.column(c).iter().sum::<f64>() / n as f64)
            .collect();

        let residuals: Vec<f64> = (0..n)
            .map(|r| {
                let row: Vec<f64> = x.row(r).to_vec();
                y[r] - predict_linear(&weights, intercept, &row)
            })
            .collect();
        let dof = n.saturating_sub(d + 1).max(1);
        let residual_std =
            (residuals.iter().map(|e| e * e).sum::<f64>() / dof as f64).sqrt();

        Ok(Self {
            weights: weights.to_vec(),
            intercept,
            feature_means,
            residual_std,
            n_samples: n,
            sufficiency,
        })
    }

    /// Score one feature row. `None` entries fall back to the training mean.
    pub fn predict_row(&self, features: &[Option<f64>]) -> f64 {
        let filled: Vec<f64> = features
            .iter()
            .enumerate()
            .map(|(i, v)| v.unwrap_or_else(|| self.feature_means.get(i).copied().unwrap_or(0.0)))
            .collect();
        predict_linear_slice(&self.weights, self.intercept, &filled)
    }
}

fn predict_linear(weights: &Array1<f64>, intercept: f64, features: &[f64]) -> f64 {
    weights
        .iter()
        .zip(features.iter())
        .map(|(w, f)| w * f)
        .sum::<f64>()
        + intercept
}

fn predict_linear_slice(weights: &[f64], intercept: f64, features: &[f64]) -> f64 {
    weights
        .iter()
        .zip(features.iter())
        .map(|(w, f)| w * f)
        .sum::<f64>()
        + intercept
}

/// All fitted groups for one predicted column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetModel {
    /// Column label as present in the training frame.
    pub target: String,
    /// Column label as originally requested by the caller.
    pub requested_as: String,
    /// Fit over every row, used when a scenario does not address a group.
    pub global: GroupModel,
    /// Per-group fits, keyed by rendered group key.
    pub groups: BTreeMap<String, GroupModel>,
}

impl TargetModel {
    /// The model for a group key, falling back to the global fit.
    /// The boolean reports whether the key matched exactly.
    pub fn model_for_group(&self, key: &str) -> (&GroupModel, bool) {
        match self.groups.get(key) {
            Some(model) => (model, true),
            None => (&self.global, false),
        }
    }
}

/// The persisted outcome of a LEARN transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_name: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub predict_columns: Vec<String>,
    /// Resolved label -> requested label, preserved from the descriptor.
    pub column_aliases: HashMap<String, String>,
    pub feature_columns: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderKey>,
    pub is_time_series: bool,
    pub window_size: usize,
    pub sampling: SamplingTolerance,
    pub targets: Vec<TargetModel>,
}

impl ModelArtifact {
    pub fn target(&self, name: &str) -> Option<&TargetModel> {
        self.targets.iter().find(|t| t.target == name)
    }
}

/// Whether a dtype can feed the numeric estimator directly.
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Columns of `df` with a numeric dtype, excluding `exclude`, in frame order.
pub fn numeric_feature_columns(df: &DataFrame, exclude: &BTreeSet<String>) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|col| is_numeric_dtype(col.dtype()))
        .map(|col| col.name().to_string())
        .filter(|name| !exclude.contains(name))
        .collect()
}

/// Extract named columns into a row-major f64 matrix; nulls become 0.0.
pub fn columns_to_matrix(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let n_cols = col_names.len();

    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            let series = df
                .column(col_name.as_str())
                .map_err(|_| AuguryError::ColumnNotFound(col_name.clone()))?
                .as_materialized_series()
                .cast(&DataType::Float64)
                .map_err(|e| AuguryError::DataError(e.to_string()))?;
            let values: Vec<f64> = series
                .f64()
                .map_err(|e| AuguryError::DataError(e.to_string()))?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect();
            Ok(values)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
        col_refs[c][r]
    }))
}

/// Extract one column as an f64 vector; nulls become 0.0.
pub fn target_vector(df: &DataFrame, col_name: &str) -> Result<Array1<f64>> {
    let series = df
        .column(col_name)
        .map_err(|_| AuguryError::ColumnNotFound(col_name.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)
        .map_err(|e| AuguryError::DataError(e.to_string()))?;
    let values: Vec<f64> = series
        .f64()
        .map_err(|e| AuguryError::DataError(e.to_string()))?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    Ok(Array1::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_group_model_fit_and_predict() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![2.0, 4.0, 6.0, 8.0, 10.0];
        let model = GroupModel::fit(&x, &y, Sufficiency::Confident).unwrap();
        let predicted = model.predict_row(&[Some(6.0)]);
        assert!((predicted - 12.0).abs() < 1e-6);
        assert!(model.residual_std < 1e-6);
    }

    #[test]
    fn test_missing_features_fall_back_to_means() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![10.0, 20.0, 30.0];
        let model = GroupModel::fit(&x, &y, Sufficiency::Provisional).unwrap();
        // Mean feature = 2.0 => prediction equals the fit at the mean.
        let predicted = model.predict_row(&[None]);
        assert!((predicted - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_numeric_feature_columns_skips_strings() {
        let df = df!(
            "a" => &[1.0, 2.0],
            "b" => &["x", "y"],
            "c" => &[1, 2]
        )
        .unwrap();
        let cols = numeric_feature_columns(&df, &BTreeSet::new());
        assert_eq!(cols, vec!["a".to_string(), "c".to_string()]);

        let mut exclude = BTreeSet::new();
        exclude.insert("c".to_string());
        assert_eq!(
            numeric_feature_columns(&df, &exclude),
            vec!["a".to_string()]
        );
    }

    #[test]
    fn test_target_model_group_fallback() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0];
        let global = GroupModel::fit(&x, &y, Sufficiency::Confident).unwrap();
        let target = TargetModel {
            target: "sales".to_string(),
            requested_as: "sales".to_string(),
            global,
            groups: BTreeMap::new(),
        };
        let (_, exact) = target.model_for_group("unknown");
        assert!(!exact);
    }
}
