//! Loading JSON and YAML documents from disk.
//!
//! Configuration files and component manifests share the same formats; the
//! file extension decides the parser.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Picks the format from the file extension (case-insensitive).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Errors raised while reading a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported document format: {path} (expected .json, .yaml or .yml)")]
    UnsupportedFormat { path: PathBuf },
}

/// Reads and parses a document into a JSON value.
///
/// # Errors
///
/// Returns an error if the extension is unknown, the file cannot be read, or
/// the contents do not parse.
pub fn read_document(path: &Path) -> Result<Value, DocumentError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| DocumentError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&text, format).map_err(|message| DocumentError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

fn parse_document(text: &str, format: DocumentFormat) -> Result<Value, String> {
    match format {
        DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
    }
}
