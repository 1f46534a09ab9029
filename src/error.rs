//! Error types for manifest and sync operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building, serving or fetching a tree.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request could not be sent or no response was received.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization error (sync reports).
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// Directory walk failed while building a manifest.
    #[error("Directory walk failed: {0}")]
    WalkError(#[from] walkdir::Error),

    /// The provider answered with an unexpected HTTP status.
    #[error("Transport error for {url}: HTTP {status}")]
    Transport { url: String, status: u16 },

    /// The requested manifest or file does not exist on the provider.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider has no manifest to serve yet.
    #[error("Manifest unavailable: {0}")]
    Unavailable(String),

    /// Manifest bytes do not parse into well-formed entries.
    #[error("Invalid manifest at line {line}: {reason}")]
    ManifestFormat { line: usize, reason: String },

    /// A provider base URL could not be parsed or extended.
    #[error("Invalid provider URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The local destination root could not be created.
    #[error("Cannot prepare local root {path}: {source}")]
    LocalRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A relative path is malformed or would escape its root.
    #[error("Invalid relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A content hash is not a 64-digit hex string.
    #[error("Invalid content hash {0:?}")]
    InvalidHash(String),

    /// Walk met something that is neither a regular file nor a directory.
    #[error("Unsupported filesystem entry {path}: {kind}")]
    UnsupportedEntry { path: PathBuf, kind: &'static str },

    /// Fetched bytes do not match the hash recorded in the manifest.
    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Fetching or reconstructing the manifest itself failed.
    #[error("Manifest phase failed: {0}")]
    Manifest(#[source] Box<SyncError>),

    /// Fetching or writing one file failed.
    #[error("Sync of {path} failed: {source}")]
    File {
        path: String,
        #[source]
        source: Box<SyncError>,
    },

    /// A run that kept going past failures did not sync every file.
    #[error("Sync incomplete: {0}")]
    Incomplete(String),

    /// Background task could not be joined.
    #[error("Task join error: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Wraps an error raised during the manifest phase.
    pub fn in_manifest_phase(self) -> Self {
        SyncError::Manifest(Box::new(self))
    }

    /// Wraps an error raised while handling `path`.
    pub fn for_file(self, path: impl Into<String>) -> Self {
        SyncError::File {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Returns true when the error (or the error it wraps) is a not-found signal.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound(_) => true,
            SyncError::Manifest(inner) => inner.is_not_found(),
            SyncError::File { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
