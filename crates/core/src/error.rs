//! Core error types for resource model operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for resource model and manifest operations.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read manifest '{path}': {reason}")]
    ManifestReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    // Validation errors
    #[error("invalid resource '{name}': {reason}")]
    InvalidResource { name: String, reason: String },

    #[error("duplicate {kind} resource '{name}' in manifest")]
    DuplicateResource { kind: String, name: String },
}

impl Error {
    /// Create a manifest read error.
    pub fn manifest_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid resource error.
    pub fn invalid_resource(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// The standard Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
