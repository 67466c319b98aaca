//! File and URL loading into polars frames

use std::fs::File;
use std::io::Write;
use std::time::Duration;

use polars::prelude::*;
use tracing::debug;

use crate::error::{AuguryError, Result};

const URL_FETCH_TIMEOUT_SECS: u64 = 30;

/// Loader for the file formats a source reference may point at.
pub struct TableLoader;

impl TableLoader {
    /// Detect the format from the extension and load the file.
    pub fn load_path(path: &str) -> Result<DataFrame> {
        let lower = path.to_lowercase();
        if lower.ends_with(".csv") || lower.ends_with(".tsv") {
            let delimiter = if lower.ends_with(".tsv") { b'\t' } else { b',' };
            Self::load_csv(path, delimiter)
        } else if lower.ends_with(".parquet") || lower.ends_with(".pq") {
            Self::load_parquet(path)
        } else if lower.ends_with(".json") || lower.ends_with(".jsonl") {
            Self::load_json(path)
        } else {
            // CSV is the default for unknown extensions
            Self::load_csv(path, b',')
        }
    }

    /// Fetch a URL into a temp file, then delegate to the format loader.
    pub fn load_url(url: &str) -> Result<DataFrame> {
        let parsed = url::Url::parse(url)
            .map_err(|e| AuguryError::DataError(format!("Invalid URL {url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(AuguryError::DataError(format!(
                    "Unsupported URL scheme: {other}"
                )))
            }
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(URL_FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| AuguryError::DataError(format!("HTTP client: {e}")))?;
        let body = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| AuguryError::DataError(format!("Fetch failed for {url}: {e}")))?;

        // Keep the extension so format detection still works.
        let suffix = std::path::Path::new(parsed.path())
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".csv".to_string());
        let mut tmp = tempfile::Builder::new()
            .suffix(&suffix)
            .tempfile()
            .map_err(AuguryError::IoError)?;
        tmp.write_all(&body).map_err(AuguryError::IoError)?;

        let path = tmp.path().to_string_lossy().to_string();
        debug!(url, bytes = body.len(), "downloaded source table");
        Self::load_path(&path)
    }

    fn load_csv(path: &str, delimiter: u8) -> Result<DataFrame> {
        let file = File::open(path).map_err(|e| AuguryError::DataError(e.to_string()))?;

        let parse_opts = CsvParseOptions::default().with_separator(delimiter);
        let reader = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(100))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file);

        reader
            .finish()
            .map_err(|e| AuguryError::DataError(e.to_string()))
    }

    fn load_parquet(path: &str) -> Result<DataFrame> {
        let file = File::open(path).map_err(|e| AuguryError::DataError(e.to_string()))?;

        ParquetReader::new(file)
            .finish()
            .map_err(|e| AuguryError::DataError(e.to_string()))
    }

    fn load_json(path: &str) -> Result<DataFrame> {
        let file = File::open(path).map_err(|e| AuguryError::DataError(e.to_string()))?;

        JsonReader::new(file)
            .finish()
            .map_err(|e| AuguryError::DataError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "a,b,c").unwrap();
        writeln!(file, "1,2,3").unwrap();
        writeln!(file, "4,5,6").unwrap();
        file
    }

    #[test]
    fn test_load_csv_path() {
        let file = create_test_csv();
        let df = TableLoader::load_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);
    }

    #[test]
    fn test_unknown_extension_falls_back_to_csv() {
        let mut file = tempfile::Builder::new().suffix(".dat").tempfile().unwrap();
        writeln!(file, "x,y").unwrap();
        writeln!(file, "1,2").unwrap();
        let df = TableLoader::load_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(df.width(), 2);
    }

    #[test]
    fn test_bad_scheme_rejected() {
        let err = TableLoader::load_url("ftp://example.com/data.csv").unwrap_err();
        assert!(matches!(err, AuguryError::DataError(_)));
    }
}
