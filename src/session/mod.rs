//! Session controller
//!
//! The externally facing entry point: validates the environment once
//! (writable storage), normalizes caller arguments into a request descriptor,
//! and delegates to the transaction engine. Configuration and validation
//! errors surface synchronously here; phase-local failures come back as
//! annotations on the output result instead.

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{EngineConfig, VERSION};
use crate::data::DataSource;
use crate::error::Result;
use crate::output::OutputResult;
use crate::request::{LearnRequest, PredictRequest, RequestDescriptor};
use crate::storage::ModelStorage;
use crate::telemetry;
use crate::transaction::Transaction;

/// One configured engine instance.
#[derive(Debug)]
pub struct Session {
    config: EngineConfig,
    storage: ModelStorage,
    session_id: Uuid,
}

impl Session {
    /// Bootstrap a session: probe the storage location and, when enabled,
    /// fire the once-per-process background update check.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let storage = ModelStorage::new(&config.storage_path);
        storage.ensure_writable()?;

        let session_id = Uuid::new_v4();
        info!(
            %session_id,
            storage = %config.storage_path.display(),
            version = VERSION,
            "session started"
        );

        if config.check_for_updates {
            telemetry::spawn_update_check(storage.root(), VERSION);
        }

        Ok(Self {
            config,
            storage,
            session_id,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn storage(&self) -> &ModelStorage {
        &self.storage
    }

    /// Run a LEARN transaction to its breakpoint or completion.
    pub fn learn(&self, request: LearnRequest) -> Result<OutputResult> {
        let (from_data, test_from_data, parts) = request.into_parts();
        let source = DataSource::acquire(from_data)?;
        let test_source = match test_from_data {
            Some(input) => Some(DataSource::acquire(input)?),
            None => None,
        };

        let descriptor = RequestDescriptor::for_learn(parts, source, test_source, &self.config)?;
        debug!(
            model = %descriptor.model_name,
            predict = ?descriptor.predict_columns,
            time_series = descriptor.is_time_series,
            "learn request normalized"
        );
        Transaction::new(descriptor, self.storage.clone()).run()
    }

    /// Run a PREDICT transaction and return its output.
    pub fn predict(&self, request: PredictRequest) -> Result<OutputResult> {
        let (when_data, parts) = request.into_parts();
        let when_source = match when_data {
            Some(input) => Some(DataSource::acquire(input)?),
            None => None,
        };

        let descriptor = RequestDescriptor::for_predict(parts, when_source, &self.config)?;
        debug!(model = %descriptor.model_name, "predict request normalized");
        Transaction::new(descriptor, self.storage.clone()).run()
    }

    /// Names of every model persisted in this session's storage.
    pub fn models(&self) -> Result<Vec<String>> {
        self.storage.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuguryError;

    #[test]
    fn test_unusable_storage_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the storage directory should be.
        let blocked = dir.path().join("occupied");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let config = EngineConfig::with_storage_path(&blocked).without_update_check();
        let err = Session::new(config).unwrap_err();
        assert!(matches!(err, AuguryError::ConfigError(_)));
    }

    #[test]
    fn test_session_bootstraps_storage() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let config = EngineConfig::with_storage_path(&root).without_update_check();
        let session = Session::new(config).unwrap();
        assert!(root.exists());
        assert!(session.models().unwrap().is_empty());
    }
}
