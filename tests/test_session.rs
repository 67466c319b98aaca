//! Integration test: session controller surface

use augury::prelude::*;
use polars::prelude::*;
use tempfile::TempDir;

fn new_session(dir: &TempDir) -> Session {
    Session::new(
        EngineConfig::with_storage_path(dir.path().join("store")).without_update_check(),
    )
    .unwrap()
}

fn sample_df() -> DataFrame {
    let x: Vec<f64> = (1..=20).map(|v| v as f64).collect();
    let noise: Vec<f64> = (1..=20).map(|v| (v % 3) as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
    df!("x" => x, "noise" => noise, "y" => y).unwrap()
}

#[test]
fn test_empty_predict_fails_before_any_phase() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let err = session
        .learn(LearnRequest::new(Vec::<String>::new(), sample_df()))
        .unwrap_err();
    assert!(matches!(err, AuguryError::ValidationError(_)));
    // No transaction was created: storage holds nothing.
    assert!(session.models().unwrap().is_empty());
}

#[test]
fn test_unresolvable_predict_column_creates_no_transaction() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let err = session
        .learn(LearnRequest::new("ghost", sample_df()))
        .unwrap_err();
    assert!(matches!(err, AuguryError::ColumnNotFound(_)));
    assert!(session.models().unwrap().is_empty());
}

#[test]
fn test_predict_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session
        .learn(LearnRequest::new("y", sample_df()).with_model_name("idem"))
        .unwrap();

    let request = || {
        PredictRequest::new()
            .with_model_name("idem")
            .with_when(scenario([("x", 7.0)]))
    };
    let first = session.predict(request()).unwrap();
    let second = session.predict(request()).unwrap();

    assert_eq!(
        serde_json::to_string(&first.predictions).unwrap(),
        serde_json::to_string(&second.predictions).unwrap()
    );
}

#[test]
fn test_ignore_columns_are_excluded_everywhere() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let result = session
        .learn(
            LearnRequest::new("y", sample_df())
                .with_model_name("lean")
                .with_ignore_columns("noise"),
        )
        .unwrap();

    let preparation = result.preparation.as_ref().unwrap();
    assert!(!preparation.feature_columns.contains(&"noise".to_string()));
    assert!(preparation.dropped_columns.contains(&"noise".to_string()));
    assert!(!result.column_stats.as_ref().unwrap().contains_key("noise"));

    let artifact = session.storage().load("lean").unwrap();
    assert!(!artifact.feature_columns.contains(&"noise".to_string()));
}

#[test]
fn test_learn_with_separate_test_data() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let test_x: Vec<f64> = (21..=30).map(|v| v as f64).collect();
    let test_noise: Vec<f64> = (21..=30).map(|v| (v % 3) as f64).collect();
    let test_y: Vec<f64> = test_x.iter().map(|v| 2.0 * v).collect();
    let test_df = df!("x" => test_x, "noise" => test_noise, "y" => test_y).unwrap();

    let result = session
        .learn(
            LearnRequest::new("y", sample_df())
                .with_model_name("tested")
                .with_test_data(test_df),
        )
        .unwrap();

    let validation = result.validation.as_ref().unwrap();
    let target = validation.get("y").unwrap();
    // The held-out relationship is the same line: near-perfect fit.
    assert!(target.overall.r2 > 0.99);
    assert_eq!(target.overall.n_samples, 10);
}

#[test]
fn test_strange_column_labels_resolve_without_renaming() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let df = df!(
        "reading ts" => &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        "total sales" => &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]
    )
    .unwrap();

    // The caller spells the label in sanitized form; resolution maps it to
    // the real column and the alias records both spellings.
    let result = session
        .learn(LearnRequest::new("total_sales", df).with_model_name("strange"))
        .unwrap();
    assert!(result.completed);

    let artifact = session.storage().load("strange").unwrap();
    assert_eq!(artifact.predict_columns, vec!["total sales".to_string()]);
    assert_eq!(
        artifact.column_aliases.get("total sales").unwrap(),
        "total_sales"
    );
    // Predictions report the label the caller asked for.
    let prediction = session
        .predict(
            PredictRequest::new()
                .with_model_name("strange")
                .with_when(scenario([("reading ts", 7.0)])),
        )
        .unwrap();
    assert_eq!(prediction.predictions.as_ref().unwrap()[0].column, "total_sales");
}
