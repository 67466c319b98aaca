//! Integration test: time-series grouping, ordering and windows

use augury::prelude::*;
use polars::prelude::*;
use tempfile::TempDir;

fn new_session(dir: &TempDir) -> Session {
    Session::new(
        EngineConfig::with_storage_path(dir.path().join("store")).without_update_check(),
    )
    .unwrap()
}

/// Two groups, ten steps each; the target tracks the feature with a
/// group-specific offset.
fn readings(order: &[usize]) -> DataFrame {
    let mut g: Vec<&str> = Vec::new();
    let mut ts: Vec<i64> = Vec::new();
    let mut load: Vec<f64> = Vec::new();
    let mut demand: Vec<f64> = Vec::new();
    for group in ["A", "B"] {
        for step in 1..=10i64 {
            g.push(group);
            ts.push(step);
            load.push(step as f64);
            demand.push(if group == "A" {
                step as f64 * 1.5
            } else {
                step as f64 * 1.5 + 20.0
            });
        }
    }
    let take: Vec<usize> = if order.is_empty() {
        (0..g.len()).collect()
    } else {
        order.to_vec()
    };
    df!(
        "g" => take.iter().map(|&i| g[i]).collect::<Vec<_>>(),
        "ts" => take.iter().map(|&i| ts[i]).collect::<Vec<_>>(),
        "load" => take.iter().map(|&i| load[i]).collect::<Vec<_>>(),
        "demand" => take.iter().map(|&i| demand[i]).collect::<Vec<_>>()
    )
    .unwrap()
}

fn ts_request(data: DataFrame, model: &str) -> LearnRequest {
    LearnRequest::new("demand", data)
        .with_model_name(model)
        .with_group_by("g")
        .with_order_by("ts")
        .with_window_size(3)
}

fn when_data() -> DataFrame {
    df!(
        "g" => &["A", "A", "A", "B", "B", "B"],
        "ts" => &[11, 12, 13, 11, 12, 13],
        "load" => &[11.0, 12.0, 13.0, 11.0, 12.0, 13.0]
    )
    .unwrap()
}

#[test]
fn test_windows_are_invariant_under_row_permutation() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    // A permutation interleaving the two groups and scrambling time order.
    let permuted: Vec<usize> = vec![
        13, 2, 19, 0, 7, 11, 5, 16, 9, 3, 18, 1, 14, 6, 10, 4, 17, 8, 12, 15,
    ];

    session.learn(ts_request(readings(&[]), "stored")).unwrap();
    session.learn(ts_request(readings(&permuted), "scrambled")).unwrap();

    let straight = session
        .predict(
            PredictRequest::new()
                .with_model_name("stored")
                .with_when_data(when_data()),
        )
        .unwrap();
    let scrambled = session
        .predict(
            PredictRequest::new()
                .with_model_name("scrambled")
                .with_when_data(when_data()),
        )
        .unwrap();

    let lhs = serde_json::to_string(&straight.predictions).unwrap();
    let rhs = serde_json::to_string(&scrambled.predictions).unwrap();
    assert_eq!(lhs, rhs);
}

#[test]
fn test_group_predictions_use_their_own_models() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.learn(ts_request(readings(&[]), "ts")).unwrap();

    let result = session
        .predict(
            PredictRequest::new()
                .with_model_name("ts")
                .with_when_data(when_data()),
        )
        .unwrap();

    let predictions = result.predictions.as_ref().unwrap();
    assert_eq!(predictions.len(), 2);
    let a = predictions.iter().find(|p| p.group.as_deref() == Some("A")).unwrap();
    let b = predictions.iter().find(|p| p.group.as_deref() == Some("B")).unwrap();
    // Group B carries a +20 offset; the fits must not bleed into each other.
    assert!(b.value - a.value > 10.0, "a = {}, b = {}", a.value, b.value);
}

#[test]
fn test_short_group_is_provisional_not_fatal() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.learn(ts_request(readings(&[]), "ts")).unwrap();

    // Only two observed rows against a window of three.
    let short = df!(
        "g" => &["A", "A"],
        "ts" => &[11, 12],
        "load" => &[11.0, 12.0]
    )
    .unwrap();

    let result = session
        .predict(
            PredictRequest::new()
                .with_model_name("ts")
                .with_when_data(short),
        )
        .unwrap();

    let predictions = result.predictions.as_ref().unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].sufficiency, Sufficiency::Provisional);
}

#[test]
fn test_descending_order_key() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let result = session
        .learn(
            LearnRequest::new("demand", readings(&[]))
                .with_model_name("desc")
                .with_group_by("g")
                .with_order_by(("ts", false))
                .with_window_size(3),
        )
        .unwrap();

    assert!(result.completed);
    let artifact = session.storage().load("desc").unwrap();
    assert!(artifact.is_time_series);
    assert_eq!(artifact.order_by[0].column, "ts");
    assert!(!artifact.order_by[0].ascending);
}
