//! Tabular data acquisition
//!
//! Turns a caller-supplied input reference (file path, in-memory frame, or
//! URL) into a uniform column-addressable [`DataSource`] with column-name
//! resolution and an alias map for sanitized labels.

mod loader;
mod source;

pub use loader::TableLoader;
pub use source::{sanitize_label, DataSource, SourceInput};
