//! Uniform column-addressable source table

use std::collections::HashMap;

use polars::prelude::*;

use crate::error::{AuguryError, Result};

use super::loader::TableLoader;

/// A caller-supplied reference to tabular data.
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// Path to a CSV/TSV/Parquet/JSON(L) file.
    Path(String),
    /// An in-memory frame.
    Frame(DataFrame),
    /// HTTP(S) URL to a downloadable table.
    Url(String),
}

impl From<&str> for SourceInput {
    fn from(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            SourceInput::Url(value.to_string())
        } else {
            SourceInput::Path(value.to_string())
        }
    }
}

impl From<String> for SourceInput {
    fn from(value: String) -> Self {
        SourceInput::from(value.as_str())
    }
}

impl From<DataFrame> for SourceInput {
    fn from(value: DataFrame) -> Self {
        SourceInput::Frame(value)
    }
}

/// Replace every byte outside `[A-Za-z0-9_]` with an underscore.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// A loaded table plus the label bookkeeping the request normalizer needs:
/// logical-to-actual column resolution and the sanitized-label alias map.
#[derive(Debug, Clone)]
pub struct DataSource {
    frame: DataFrame,
    /// sanitized label -> original label, for every column whose sanitized
    /// form differs from the original.
    alias_map: HashMap<String, String>,
}

impl DataSource {
    /// Load whatever the input reference points at.
    pub fn acquire(input: SourceInput) -> Result<Self> {
        let frame = match input {
            SourceInput::Path(path) => TableLoader::load_path(&path)?,
            SourceInput::Url(url) => TableLoader::load_url(&url)?,
            SourceInput::Frame(df) => df,
        };
        Ok(Self::from_frame(frame))
    }

    pub fn from_frame(frame: DataFrame) -> Self {
        let mut alias_map = HashMap::new();
        for name in frame.get_column_names() {
            let original = name.to_string();
            let sanitized = sanitize_label(&original);
            if sanitized != original {
                alias_map.insert(sanitized, original);
            }
        }
        Self { frame, alias_map }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Map sanitized labels back to the originals present in the table.
    pub fn alias_map(&self) -> &HashMap<String, String> {
        &self.alias_map
    }

    /// Resolve a logical column name to the label actually present in the
    /// table: exact match first, then a match after sanitizing both sides.
    pub fn resolve_column(&self, logical: &str) -> Result<String> {
        let columns = self.columns();
        if columns.iter().any(|c| c == logical) {
            return Ok(logical.to_string());
        }
        let wanted = sanitize_label(logical);
        for column in &columns {
            if sanitize_label(column) == wanted {
                return Ok(column.clone());
            }
        }
        Err(AuguryError::ColumnNotFound(logical.to_string()))
    }
}
