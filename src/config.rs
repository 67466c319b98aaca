//! Engine configuration and process-wide defaults

use std::path::PathBuf;

/// Crate version, stamped into model artifacts and telemetry tokens.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Model name used when the caller does not provide one.
pub const DEFAULT_MODEL_NAME: &str = "augury_model";

/// Default number of trailing samples a time-series step may consume.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Default sampling margin of error. Zero means "use the full population".
pub const DEFAULT_MARGIN_OF_ERROR: f64 = 0.0;

/// Default sampling confidence level.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.98;

/// Endpoint polled (best-effort) for newer released versions.
pub const UPDATE_CHECK_URL: &str = "https://updates.augury-ml.dev/check";

/// Environment variable overriding the storage location.
pub const STORAGE_PATH_ENV: &str = "AUGURY_STORAGE_PATH";

/// Engine-level configuration, shared by every session built from it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory where trained model artifacts are persisted.
    pub storage_path: PathBuf,
    /// Whether to spawn the background update check on session creation.
    pub check_for_updates: bool,
    /// Default margin of error applied when a request does not set one.
    pub margin_of_error: f64,
    /// Default confidence level applied when a request does not set one.
    pub confidence_level: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let storage_path = std::env::var(STORAGE_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("augury_storage"));
        Self {
            storage_path,
            check_for_updates: true,
            margin_of_error: DEFAULT_MARGIN_OF_ERROR,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at an explicit storage directory.
    pub fn with_storage_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: path.into(),
            ..Self::default()
        }
    }

    /// Disable the background update check (useful for tests and air-gapped runs).
    pub fn without_update_check(mut self) -> Self {
        self.check_for_updates = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_storage_path() {
        let config = EngineConfig::with_storage_path("/tmp/augury_test");
        assert_eq!(config.storage_path, PathBuf::from("/tmp/augury_test"));
        assert!(config.check_for_updates);
    }

    #[test]
    fn test_without_update_check() {
        let config = EngineConfig::default().without_update_check();
        assert!(!config.check_for_updates);
    }
}
