use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::crdt::ResourceId;

/// Unified error type for codesync operations
#[derive(Debug, Error)]
pub enum SyncError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // CRDT errors
    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error(
        "Edit out of bounds: position {position} + length {len} exceeds document length {doc_len}"
    )]
    OutOfBounds {
        position: usize,
        len: usize,
        doc_len: usize,
    },

    #[error("No document registered for {0}")]
    UnknownResource(ResourceId),

    // Wire format errors
    #[error("Malformed sync message: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type alias for codesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// A serializable representation of SyncError for IPC (e.g., a webview bridge)
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated path (if applicable)
    pub path: Option<PathBuf>,
}

impl From<&SyncError> for SerializableError {
    fn from(err: &SyncError) -> Self {
        let kind = match err {
            SyncError::Io(_) => "Io",
            SyncError::FileRead { .. } => "FileRead",
            SyncError::FileWrite { .. } => "FileWrite",
            SyncError::Crdt(_) => "Crdt",
            SyncError::OutOfBounds { .. } => "OutOfBounds",
            SyncError::UnknownResource(_) => "UnknownResource",
            SyncError::Json(_) => "Json",
            SyncError::ConfigParse(_) => "ConfigParse",
            SyncError::ConfigSerialize(_) => "ConfigSerialize",
            SyncError::NoConfigDir => "NoConfigDir",
        }
        .to_string();

        let path = match err {
            SyncError::FileRead { path, .. } => Some(path.clone()),
            SyncError::FileWrite { path, .. } => Some(path.clone()),
            SyncError::UnknownResource(resource) => Some(PathBuf::from(resource.path())),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<SyncError> for SerializableError {
    fn from(err: SyncError) -> Self {
        SerializableError::from(&err)
    }
}

impl SyncError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    /// Whether this error means a batch of edits no longer fits the document.
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, SyncError::OutOfBounds { .. })
    }
}
