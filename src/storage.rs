//! Model artifact persistence
//!
//! One pretty-printed JSON file per model under the storage root. The root is
//! probed for writability up front so an unusable location fails the session
//! before any transaction is constructed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AuguryError, Result};
use crate::model::ModelArtifact;

const ARTIFACT_EXTENSION: &str = "json";

/// Filesystem-backed model store.
#[derive(Debug, Clone)]
pub struct ModelStorage {
    root: PathBuf,
}

impl ModelStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if missing and probe it with a real write.
    ///
    /// Failure is a `ConfigError`: fatal before any transaction exists.
    pub fn ensure_writable(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|e| {
                AuguryError::ConfigError(format!(
                    "storage path {} does not exist and could not be created: {e}",
                    self.root.display()
                ))
            })?;
        }
        let probe = self.root.join(".write_probe");
        fs::write(&probe, b"ok").map_err(|e| {
            AuguryError::ConfigError(format!(
                "cannot write into storage path {}: {e}",
                self.root.display()
            ))
        })?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    fn artifact_path(&self, model_name: &str) -> PathBuf {
        // Model names come from callers; keep the file name filesystem-safe.
        let safe = crate::data::sanitize_label(model_name);
        self.root.join(format!("{safe}.{ARTIFACT_EXTENSION}"))
    }

    pub fn save(&self, artifact: &ModelArtifact) -> Result<()> {
        let path = self.artifact_path(&artifact.model_name);
        let json = serde_json::to_string_pretty(artifact)?;
        fs::write(&path, json)
            .map_err(|e| AuguryError::StorageError(format!("{}: {e}", path.display())))?;
        debug!(model = %artifact.model_name, path = %path.display(), "persisted model artifact");
        Ok(())
    }

    pub fn load(&self, model_name: &str) -> Result<ModelArtifact> {
        let path = self.artifact_path(model_name);
        if !path.exists() {
            return Err(AuguryError::ModelNotFound(model_name.to_string()));
        }
        let json = fs::read_to_string(&path)
            .map_err(|e| AuguryError::StorageError(format!("{}: {e}", path.display())))?;
        let artifact: ModelArtifact = serde_json::from_str(&json)?;
        Ok(artifact)
    }

    /// Names of every stored model.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(AuguryError::IoError)? {
            let entry = entry.map_err(AuguryError::IoError)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, model_name: &str) -> Result<()> {
        let path = self.artifact_path(model_name);
        if !path.exists() {
            return Err(AuguryError::ModelNotFound(model_name.to_string()));
        }
        fs::remove_file(&path)
            .map_err(|e| AuguryError::StorageError(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupModel, TargetModel};
    use crate::sampling::{SamplingTolerance, Sufficiency};
    use ndarray::array;
    use std::collections::{BTreeMap, HashMap};

    fn sample_artifact(name: &str) -> ModelArtifact {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0];
        let global = GroupModel::fit(&x, &y, Sufficiency::Confident).unwrap();
        ModelArtifact {
            model_name: name.to_string(),
            version: crate::config::VERSION.to_string(),
            created_at: chrono::Utc::now(),
            predict_columns: vec!["y".to_string()],
            column_aliases: HashMap::new(),
            feature_columns: vec!["x".to_string()],
            group_by: Vec::new(),
            order_by: Vec::new(),
            is_time_series: false,
            window_size: 10,
            sampling: SamplingTolerance::default(),
            targets: vec![TargetModel {
                target: "y".to_string(),
                requested_as: "y".to_string(),
                global,
                groups: BTreeMap::new(),
            }],
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ModelStorage::new(dir.path());
        storage.ensure_writable().unwrap();

        storage.save(&sample_artifact("demo")).unwrap();
        let loaded = storage.load("demo").unwrap();
        assert_eq!(loaded.model_name, "demo");
        assert_eq!(loaded.targets.len(), 1);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ModelStorage::new(dir.path());
        let err = storage.load("nope").unwrap_err();
        assert!(matches!(err, AuguryError::ModelNotFound(_)));
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ModelStorage::new(dir.path());
        storage.ensure_writable().unwrap();
        storage.save(&sample_artifact("a_model")).unwrap();
        storage.save(&sample_artifact("b_model")).unwrap();

        assert_eq!(storage.list().unwrap(), vec!["a_model", "b_model"]);
        storage.delete("a_model").unwrap();
        assert_eq!(storage.list().unwrap(), vec!["b_model"]);
    }

    #[test]
    fn test_ensure_writable_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("storage");
        let storage = ModelStorage::new(&nested);
        storage.ensure_writable().unwrap();
        assert!(nested.exists());
    }
}
