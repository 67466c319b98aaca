//! Best-effort update check
//!
//! A single outbound request per process lifetime, carrying an opaque
//! installation token. Runs on a detached thread with its own error boundary:
//! nothing here ever blocks a transaction or propagates to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::UPDATE_CHECK_URL;
use crate::error::{AuguryError, Result};

static UPDATE_CHECK_STARTED: AtomicBool = AtomicBool::new(false);

const REQUEST_TIMEOUT_SECS: u64 = 5;
/// Installation UUID token, kept next to (not inside) the storage directory.
const INSTALL_TOKEN_FILE: &str = "augury.uuid";
/// Composed `system|version|uuid` identity token.
const IDENTITY_TOKEN_FILE: &str = "augury.id";

/// Fire the update check once per process, on a detached thread.
///
/// Shutdown never waits on it; any failure is logged and swallowed.
pub fn spawn_update_check(storage_root: &Path, version: &str) {
    if UPDATE_CHECK_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    let root = storage_root.to_path_buf();
    let version = version.to_string();
    thread::spawn(move || {
        if let Err(e) = check_for_updates(&root, &version) {
            warn!("could not check for updates: {e}");
        }
    });
}

fn token_dir(storage_root: &Path) -> PathBuf {
    storage_root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Read a token file, or write it once if absent. An unwritable location
/// degrades to an in-memory token marked `.NO_WRITE`; never fatal.
fn read_or_create_token(path: &Path, fresh: &str) -> String {
    if path.is_file() {
        if let Ok(token) = fs::read_to_string(path) {
            let token = token.trim();
            if !token.is_empty() {
                return token.to_string();
            }
        }
    }
    match fs::write(path, fresh) {
        Ok(()) => fresh.to_string(),
        Err(_) => {
            warn!(
                "cannot store token, please add write permissions to {}",
                path.display()
            );
            format!("{fresh}.NO_WRITE")
        }
    }
}

/// Ask the update endpoint whether a newer version exists.
///
/// Free function on purpose: it depends on nothing but the storage location
/// and the running version, so it can run on a bare background thread.
pub fn check_for_updates(storage_root: &Path, version: &str) -> Result<()> {
    let dir = token_dir(storage_root);
    let install_token = read_or_create_token(
        &dir.join(INSTALL_TOKEN_FILE),
        &uuid::Uuid::new_v4().to_string(),
    );
    let identity = format!("{}|{}|{}", std::env::consts::OS, version, install_token);
    let identity_token = read_or_create_token(&dir.join(IDENTITY_TOKEN_FILE), &identity);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| AuguryError::TelemetryError(e.to_string()))?;
    let response = client
        .get(UPDATE_CHECK_URL)
        .query(&[("token", identity_token.as_str())])
        .send()
        .map_err(|e| AuguryError::TelemetryError(e.to_string()))?;
    let body: serde_json::Value = response
        .json()
        .map_err(|e| AuguryError::TelemetryError(e.to_string()))?;

    match body.get("version").and_then(|v| v.as_str()) {
        Some(latest) if latest != version => {
            info!("a newer version of augury is available: {latest} (running {version})");
        }
        Some(_) => debug!("augury is up to date"),
        None => debug!("update endpoint returned no version field"),
    }
    Ok(())
}
