//! Phase implementations
//!
//! Each phase consumes what the previous one wrote into the transaction and
//! adds its own outputs. Failures local to one time-series group are recorded
//! as notes and never abort sibling groups; a phase only fails hard when its
//! required aggregate is unobtainable (no source, no model, no fittable
//! group at all).

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;

use crate::config::VERSION;
use crate::error::{AuguryError, Result};
use crate::model::{
    columns_to_matrix, numeric_feature_columns, target_vector, GroupModel, ModelArtifact,
    RegressionMetrics, TargetModel,
};
use crate::output::{ColumnStats, PreparationSummary, Prediction, TargetValidation};
use crate::request::{WhenConditions, WhenScenario, WhenValue};
use crate::sampling::{classify, required_sample_size, z_score};
use crate::timeseries::{partition_by_keys, render_key, sort_by_order_keys, trailing_window};
use crate::transaction::{Phase, PreparedData, Transaction};

/// Seed for the analysis-phase row sample; fixed so repeated runs over the
/// same data produce the same estimates.
const ANALYSIS_SAMPLE_SEED: u64 = 0x6175_6775;

impl Transaction {
    // ── LEARN: data analysis ────────────────────────────────────────────

    pub(super) fn phase_data_analysis(&mut self) -> Result<()> {
        let sampling = self.descriptor.sampling;
        let ignore = self.descriptor.ignore_columns.clone();

        let df = {
            let source = self.descriptor.source.as_ref().ok_or_else(|| {
                AuguryError::DataError("learn transaction has no source table".to_string())
            })?;
            source.frame().clone()
        };

        let population = df.height();
        let required = required_sample_size(population, &sampling);
        let sample = if required < population {
            let mut rng = StdRng::seed_from_u64(ANALYSIS_SAMPLE_SEED);
            let mut indices = rand::seq::index::sample(&mut rng, population, required).into_vec();
            indices.sort_unstable();
            let idx = IdxCa::from_vec("".into(), indices.into_iter().map(|i| i as IdxSize).collect());
            df.take(&idx)?
        } else {
            df.clone()
        };

        let mut stats = BTreeMap::new();
        for column in sample.get_columns() {
            let name = column.name().to_string();
            if ignore.contains(&name) {
                continue;
            }
            stats.insert(name, column_stats(column.as_materialized_series()));
        }

        self.result.stats_sufficiency = Some(classify(sample.height(), population, &sampling));
        self.result.column_stats = Some(stats);
        Ok(())
    }

    // ── LEARN: data preparation ─────────────────────────────────────────

    pub(super) fn phase_prepare_learn(&mut self) -> Result<()> {
        let df = {
            let source = self.descriptor.source.as_ref().ok_or_else(|| {
                AuguryError::DataError("learn transaction has no source table".to_string())
            })?;
            source.frame().clone()
        };

        let (df, dropped) = drop_ignored(df, &self.descriptor.ignore_columns)?;

        // The predict targets feed a numeric estimator; reject frames where a
        // target cannot hold numbers at all.
        for target in &self.descriptor.predict_columns {
            let dtype = df
                .column(target.as_str())
                .map_err(|_| AuguryError::ColumnNotFound(target.clone()))?
                .dtype()
                .clone();
            if !crate::model::is_numeric_dtype(&dtype) {
                return Err(AuguryError::DataError(format!(
                    "predict column {target} has non-numeric dtype {dtype}"
                )));
            }
        }

        let mut excluded: BTreeSet<String> = self.descriptor.predict_columns.iter().cloned().collect();
        excluded.extend(self.descriptor.group_by.iter().cloned());
        excluded.extend(self.descriptor.order_by.iter().map(|k| k.column.clone()));
        let feature_columns = numeric_feature_columns(&df, &excluded);

        let mut groups = partition_by_keys(&df, &self.descriptor.group_by)?;
        if self.descriptor.is_time_series {
            for frame in groups.values_mut() {
                *frame = sort_by_order_keys(frame, &self.descriptor.order_by)?;
            }
        }

        self.result.preparation = Some(PreparationSummary {
            total_rows: df.height(),
            group_count: groups.len(),
            feature_columns: feature_columns.clone(),
            dropped_columns: dropped,
        });
        self.prepared = Some(PreparedData {
            groups,
            feature_columns,
            total_rows: df.height(),
        });
        Ok(())
    }

    // ── LEARN: model training ───────────────────────────────────────────

    pub(super) fn phase_train(&mut self) -> Result<()> {
        let (feature_columns, group_frames) = {
            let prepared = self.prepared.as_ref().ok_or_else(|| {
                AuguryError::DataError("data preparation has not run".to_string())
            })?;
            (prepared.feature_columns.clone(), prepared.groups.clone())
        };

        let sampling = self.descriptor.sampling;
        let is_ts = self.descriptor.is_time_series;
        let window = self.descriptor.window_size;
        let has_test = self.descriptor.test_source.is_some();
        let predict_columns = self.descriptor.predict_columns.clone();
        let aliases = self.descriptor.column_aliases.clone();

        // Reserve a per-group tail holdout when no test source was supplied.
        let mut train_frames: Vec<(String, DataFrame)> = Vec::new();
        let mut holdout: BTreeMap<String, DataFrame> = BTreeMap::new();
        for (key, frame) in &group_frames {
            let n = frame.height();
            let val_len = if has_test || n < 5 { 0 } else { n / 5 };
            train_frames.push((key.clone(), frame.slice(0, n - val_len)));
            if val_len > 0 {
                holdout.insert(key.clone(), frame.slice((n - val_len) as i64, val_len));
            }
        }

        let mut targets: Vec<TargetModel> = Vec::new();
        for target in &predict_columns {
            let requested = aliases.get(target).cloned().unwrap_or_else(|| target.clone());

            // Groups are independent: fit them in parallel, aggregate by key.
            let fitted: Vec<(String, Result<(GroupModel, (Array2<f64>, Array1<f64>))>)> =
                train_frames
                    .par_iter()
                    .map(|(key, frame)| {
                        let outcome =
                            build_training_samples(frame, &feature_columns, target, is_ts, window)
                                .and_then(|(x, y)| {
                                    // A group's training rows are its whole
                                    // designated population; the tolerance
                                    // sets the absolute floor beyond that.
                                    let sufficiency = classify(x.nrows(), x.nrows(), &sampling);
                                    GroupModel::fit(&x, &y, sufficiency).map(|m| (m, (x, y)))
                                });
                        (key.clone(), outcome)
                    })
                    .collect();

            let mut group_models: BTreeMap<String, GroupModel> = BTreeMap::new();
            let mut parts: Vec<(Array2<f64>, Array1<f64>)> = Vec::new();
            for (key, outcome) in fitted {
                match outcome {
                    Ok((model, part)) => {
                        group_models.insert(key, model);
                        parts.push(part);
                    }
                    Err(e) => self.note(
                        Phase::ModelTraining,
                        Some(key),
                        Some(requested.clone()),
                        format!("group skipped: {e}"),
                    ),
                }
            }

            if group_models.is_empty() {
                self.note(
                    Phase::ModelTraining,
                    None,
                    Some(requested.clone()),
                    "no group could be fitted for this target",
                );
                continue;
            }

            let (gx, gy) = stack_samples(&parts);
            let global_sufficiency = classify(gx.nrows(), gx.nrows(), &sampling);
            let global = GroupModel::fit(&gx, &gy, global_sufficiency)?;

            targets.push(TargetModel {
                target: target.clone(),
                requested_as: requested,
                global,
                groups: group_models,
            });
        }

        if targets.is_empty() {
            return Err(AuguryError::PhaseError {
                phase: Phase::ModelTraining.label().to_string(),
                message: "no predict column could be fitted for any group".to_string(),
            });
        }

        let artifact = ModelArtifact {
            model_name: self.descriptor.model_name.clone(),
            version: VERSION.to_string(),
            created_at: chrono::Utc::now(),
            predict_columns,
            column_aliases: aliases,
            feature_columns,
            group_by: self.descriptor.group_by.clone(),
            order_by: self.descriptor.order_by.clone(),
            is_time_series: is_ts,
            window_size: window,
            sampling,
            targets,
        };
        self.storage.save(&artifact)?;
        self.holdout = holdout;
        self.artifact = Some(artifact);
        Ok(())
    }

    // ── LEARN: model validation ─────────────────────────────────────────

    pub(super) fn phase_validate(&mut self) -> Result<()> {
        let artifact = self
            .artifact
            .clone()
            .ok_or_else(|| AuguryError::DataError("model training has not run".to_string()))?;

        let eval_frames: BTreeMap<String, DataFrame> =
            if let Some(test) = self.descriptor.test_source.as_ref() {
                let (df, _) = drop_ignored(test.frame().clone(), &self.descriptor.ignore_columns)?;
                let mut groups = partition_by_keys(&df, &artifact.group_by)?;
                if artifact.is_time_series {
                    for frame in groups.values_mut() {
                        *frame = sort_by_order_keys(frame, &artifact.order_by)?;
                    }
                }
                groups
            } else {
                self.holdout.clone()
            };

        let total_eval: usize = eval_frames.values().map(|f| f.height()).sum();
        if total_eval == 0 {
            self.note(
                Phase::ModelValidation,
                None,
                None,
                "no validation data available (groups too small and no test source)",
            );
            return Ok(());
        }

        let mut validation: BTreeMap<String, TargetValidation> = BTreeMap::new();
        for target_model in &artifact.targets {
            let frames: Vec<(String, DataFrame)> = eval_frames
                .iter()
                .map(|(k, f)| (k.clone(), f.clone()))
                .collect();

            let scored: Vec<(String, Result<(Vec<f64>, Vec<f64>)>)> = frames
                .par_iter()
                .map(|(key, frame)| {
                    let outcome = score_frame(
                        frame,
                        &artifact.feature_columns,
                        target_model,
                        key,
                        artifact.is_time_series,
                        artifact.window_size,
                    );
                    (key.clone(), outcome)
                })
                .collect();

            let mut per_group: BTreeMap<String, RegressionMetrics> = BTreeMap::new();
            let mut truth_all: Vec<f64> = Vec::new();
            let mut preds_all: Vec<f64> = Vec::new();
            let mut notes: Vec<(String, String)> = Vec::new();
            for (key, outcome) in scored {
                match outcome {
                    Ok((truth, preds)) => {
                        let metrics = RegressionMetrics::compute(
                            &Array1::from_vec(truth.clone()),
                            &Array1::from_vec(preds.clone()),
                        );
                        per_group.insert(key, metrics);
                        truth_all.extend(truth);
                        preds_all.extend(preds);
                    }
                    Err(e) => notes.push((key, format!("validation skipped: {e}"))),
                }
            }
            for (key, message) in notes {
                self.note(
                    Phase::ModelValidation,
                    Some(key),
                    Some(target_model.requested_as.clone()),
                    message,
                );
            }

            let overall = RegressionMetrics::compute(
                &Array1::from_vec(truth_all),
                &Array1::from_vec(preds_all),
            );
            let sufficiency = classify(overall.n_samples, total_eval, &artifact.sampling);
            validation.insert(
                target_model.requested_as.clone(),
                TargetValidation {
                    overall,
                    per_group,
                    sufficiency,
                },
            );
        }

        self.result.validation = Some(validation);
        Ok(())
    }

    // ── PREDICT: data preparation ───────────────────────────────────────

    pub(super) fn phase_prepare_predict(&mut self) -> Result<()> {
        // A missing model voids every downstream aggregate: fatal.
        let artifact = self.storage.load(&self.descriptor.model_name)?;

        if let WhenConditions::Scenarios(scenarios) = &self.descriptor.when_conditions {
            let mut known: BTreeSet<&str> = BTreeSet::new();
            known.extend(artifact.feature_columns.iter().map(String::as_str));
            known.extend(artifact.group_by.iter().map(String::as_str));
            known.extend(artifact.predict_columns.iter().map(String::as_str));
            known.extend(artifact.order_by.iter().map(|k| k.column.as_str()));
            known.extend(
                artifact
                    .column_aliases
                    .iter()
                    .flat_map(|(k, v)| [k.as_str(), v.as_str()]),
            );
            let unknown: Vec<String> = scenarios
                .iter()
                .flat_map(|s| s.keys())
                .filter(|k| !known.contains(k.as_str()))
                .cloned()
                .collect();
            for column in unknown {
                self.note(
                    Phase::DataPreparation,
                    None,
                    None,
                    format!("when condition references unknown column {column}, ignoring it"),
                );
            }
        }

        if let Some(source) = self.descriptor.source.as_ref() {
            let df = source.frame().clone();
            let mut groups = partition_by_keys(&df, &artifact.group_by)?;
            if artifact.is_time_series {
                for frame in groups.values_mut() {
                    *frame = sort_by_order_keys(frame, &artifact.order_by)?;
                }
            }
            self.result.preparation = Some(PreparationSummary {
                total_rows: df.height(),
                group_count: groups.len(),
                feature_columns: artifact.feature_columns.clone(),
                dropped_columns: Vec::new(),
            });
            self.prepared = Some(PreparedData {
                groups,
                feature_columns: artifact.feature_columns.clone(),
                total_rows: df.height(),
            });
        }

        self.artifact = Some(artifact);
        Ok(())
    }

    // ── PREDICT: inference ──────────────────────────────────────────────

    pub(super) fn phase_infer(&mut self) -> Result<()> {
        let artifact = self
            .artifact
            .clone()
            .ok_or_else(|| AuguryError::DataError("model was not loaded".to_string()))?;
        let z = z_score(artifact.sampling.confidence_level);

        let mut predictions: Vec<Prediction> = Vec::new();
        match self.descriptor.when_conditions.clone() {
            WhenConditions::Scenarios(scenarios) => {
                for scenario in &scenarios {
                    for target_model in &artifact.targets {
                        let (prediction, fallback_note) =
                            predict_scenario(&artifact, target_model, scenario, z);
                        if let Some(message) = fallback_note {
                            self.note(
                                Phase::Inference,
                                prediction.group.clone(),
                                Some(target_model.requested_as.clone()),
                                message,
                            );
                        }
                        predictions.push(prediction);
                    }
                }
            }
            WhenConditions::Unconstrained => {
                if let Some(prepared) = self.prepared.as_ref() {
                    // Independent groups: score them in parallel, then
                    // aggregate by key so completion order cannot matter.
                    let frames: Vec<(String, DataFrame)> = prepared
                        .groups
                        .iter()
                        .map(|(k, f)| (k.clone(), f.clone()))
                        .collect();
                    let scored: Vec<(String, Result<Vec<Prediction>>)> = frames
                        .par_iter()
                        .map(|(key, frame)| {
                            let outcome = predict_from_window(&artifact, key, frame, z);
                            (key.clone(), outcome)
                        })
                        .collect();
                    for (key, outcome) in scored {
                        match outcome {
                            Ok(mut group_predictions) => predictions.append(&mut group_predictions),
                            Err(e) => self.note(
                                Phase::Inference,
                                Some(key),
                                None,
                                format!("group skipped: {e}"),
                            ),
                        }
                    }
                } else {
                    // No constraint and no readings: report each fitted
                    // group's baseline estimate.
                    for target_model in &artifact.targets {
                        for (key, model) in &target_model.groups {
                            let features = vec![None; artifact.feature_columns.len()];
                            let value = model.predict_row(&features);
                            let bound = z * model.residual_std;
                            predictions.push(Prediction {
                                group: group_label(&artifact, key),
                                column: target_model.requested_as.clone(),
                                value,
                                lower: value - bound,
                                upper: value + bound,
                                sufficiency: model.sufficiency,
                            });
                        }
                    }
                }
            }
        }

        if predictions.is_empty() {
            return Err(AuguryError::PhaseError {
                phase: Phase::Inference.label().to_string(),
                message: "no prediction could be produced for any group".to_string(),
            });
        }
        self.result.predictions = Some(predictions);
        Ok(())
    }
}

// ── helpers ─────────────────────────────────────────────────────────────

/// Drop every ignored column present in the frame.
fn drop_ignored(df: DataFrame, ignore: &BTreeSet<String>) -> Result<(DataFrame, Vec<String>)> {
    let mut df = df;
    let mut dropped = Vec::new();
    for name in ignore {
        if df.get_column_names().iter().any(|c| c.as_str() == name) {
            df = df.drop(name)?;
            dropped.push(name.clone());
        }
    }
    Ok((df, dropped))
}

fn column_stats(series: &Series) -> ColumnStats {
    let mut mean = None;
    let mut std_dev = None;
    let mut min = None;
    let mut max = None;

    if let Ok(cast) = series.cast(&DataType::Float64) {
        if let Ok(ca) = cast.f64() {
            let values: Vec<f64> = ca.into_iter().flatten().collect();
            if !values.is_empty() {
                let n = values.len() as f64;
                let m = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                mean = Some(m);
                std_dev = Some(variance.sqrt());
                min = Some(values.iter().copied().fold(f64::INFINITY, f64::min));
                max = Some(values.iter().copied().fold(f64::NEG_INFINITY, f64::max));
            }
        }
    }

    ColumnStats {
        dtype: series.dtype().to_string(),
        count: series.len(),
        null_count: series.null_count(),
        distinct: series.n_unique().ok(),
        mean,
        std_dev,
        min,
        max,
    }
}

/// Build `(X, y)` for one group.
///
/// Time-series groups turn each step `t` into (mean of the features over the
/// at-most-`window` preceding rows, target at `t`); plain groups use rows
/// directly.
fn build_training_samples(
    frame: &DataFrame,
    features: &[String],
    target: &str,
    is_time_series: bool,
    window: usize,
) -> Result<(Array2<f64>, Array1<f64>)> {
    if !is_time_series {
        let x = columns_to_matrix(frame, features)?;
        let y = target_vector(frame, target)?;
        return Ok((x, y));
    }

    let n = frame.height();
    if n < 2 {
        return Err(AuguryError::DataError(format!(
            "time-series group needs at least 2 rows, has {n}"
        )));
    }
    let x_full = columns_to_matrix(frame, features)?;
    let y_full = target_vector(frame, target)?;
    let d = features.len();

    let mut flat: Vec<f64> = Vec::with_capacity((n - 1) * d);
    let mut y: Vec<f64> = Vec::with_capacity(n - 1);
    for t in 1..n {
        let start = t.saturating_sub(window);
        let span = (t - start) as f64;
        for c in 0..d {
            let mut acc = 0.0;
            for r in start..t {
                acc += x_full[[r, c]];
            }
            flat.push(acc / span);
        }
        y.push(y_full[t]);
    }
    let x = Array2::from_shape_vec((n - 1, d), flat)
        .map_err(|e| AuguryError::DataError(e.to_string()))?;
    Ok((x, Array1::from_vec(y)))
}

/// Concatenate per-group samples into one global training set.
fn stack_samples(parts: &[(Array2<f64>, Array1<f64>)]) -> (Array2<f64>, Array1<f64>) {
    let d = parts.iter().map(|(x, _)| x.ncols()).max().unwrap_or(0);
    let total: usize = parts.iter().map(|(_, y)| y.len()).sum();
    let mut x = Array2::zeros((total, d));
    let mut y = Array1::zeros(total);
    let mut row = 0;
    for (px, py) in parts {
        for r in 0..px.nrows() {
            for c in 0..px.ncols() {
                x[[row, c]] = px[[r, c]];
            }
            y[row] = py[r];
            row += 1;
        }
    }
    (x, y)
}

/// Score one evaluation frame with the group's model (global fallback).
fn score_frame(
    frame: &DataFrame,
    features: &[String],
    target_model: &TargetModel,
    key: &str,
    is_time_series: bool,
    window: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let (x, y) = build_training_samples(frame, features, &target_model.target, is_time_series, window)?;
    let (model, _) = target_model.model_for_group(key);
    let preds: Vec<f64> = (0..x.nrows())
        .map(|r| {
            let row: Vec<Option<f64>> = x.row(r).iter().map(|v| Some(*v)).collect();
            model.predict_row(&row)
        })
        .collect();
    Ok((y.to_vec(), preds))
}

/// Look a scenario up under both the resolved and the requested spelling.
fn scenario_value<'a>(
    scenario: &'a WhenScenario,
    column: &str,
    artifact: &ModelArtifact,
) -> Option<&'a WhenValue> {
    scenario.get(column).or_else(|| {
        artifact
            .column_aliases
            .get(column)
            .and_then(|requested| scenario.get(requested))
    })
}

fn group_label(artifact: &ModelArtifact, key: &str) -> Option<String> {
    if artifact.group_by.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Predict one scenario for one target. Returns the prediction plus an
/// optional note when the scenario addressed a group the model never saw.
fn predict_scenario(
    artifact: &ModelArtifact,
    target_model: &TargetModel,
    scenario: &WhenScenario,
    z: f64,
) -> (Prediction, Option<String>) {
    let key = if !artifact.group_by.is_empty()
        && artifact
            .group_by
            .iter()
            .all(|c| scenario_value(scenario, c, artifact).is_some())
    {
        let values: Vec<String> = artifact
            .group_by
            .iter()
            .map(|c| scenario_value(scenario, c, artifact).map(WhenValue::render).unwrap_or_default())
            .collect();
        Some(render_key(&values))
    } else {
        None
    };

    let (model, exact) = match &key {
        Some(k) => target_model.model_for_group(k),
        None => (&target_model.global, artifact.group_by.is_empty()),
    };
    let fallback_note = match (&key, exact) {
        (Some(k), false) => Some(format!("group {k} not seen during training, using global fit")),
        _ => None,
    };

    let features: Vec<Option<f64>> = artifact
        .feature_columns
        .iter()
        .map(|f| scenario_value(scenario, f, artifact).and_then(WhenValue::as_f64))
        .collect();

    let value = model.predict_row(&features);
    let bound = z * model.residual_std;
    (
        Prediction {
            group: key,
            column: target_model.requested_as.clone(),
            value,
            lower: value - bound,
            upper: value + bound,
            sufficiency: model.sufficiency,
        },
        fallback_note,
    )
}

/// Predict the next step for one group of observed readings: aggregate the
/// trailing window into a feature row and score every target.
fn predict_from_window(
    artifact: &ModelArtifact,
    key: &str,
    frame: &DataFrame,
    z: f64,
) -> Result<Vec<Prediction>> {
    if frame.height() == 0 {
        return Err(AuguryError::DataError("group has no rows".to_string()));
    }
    let window = trailing_window(frame, frame.height(), artifact.window_size);
    let present: BTreeSet<String> = frame
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut features: Vec<Option<f64>> = Vec::with_capacity(artifact.feature_columns.len());
    for feature in &artifact.feature_columns {
        if present.contains(feature) {
            let values = target_vector(&window, feature)?;
            if values.is_empty() {
                features.push(None);
            } else {
                features.push(Some(values.iter().sum::<f64>() / values.len() as f64));
            }
        } else {
            features.push(None);
        }
    }

    // Fewer observed rows than the window asks for never fails the group,
    // but the estimate is not allowed to claim confidence.
    let short_window = artifact.is_time_series && window.height() < artifact.window_size;

    let mut predictions = Vec::new();
    for target_model in &artifact.targets {
        let (model, _) = target_model.model_for_group(key);
        let value = model.predict_row(&features);
        let bound = z * model.residual_std;
        let sufficiency = if short_window {
            crate::sampling::Sufficiency::Provisional
        } else {
            model.sufficiency
        };
        predictions.push(Prediction {
            group: group_label(artifact, key),
            column: target_model.requested_as.clone(),
            value,
            lower: value - bound,
            upper: value + bound,
            sufficiency,
        });
    }
    Ok(predictions)
}
