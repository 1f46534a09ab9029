//! Configuration and report structures.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the provider side.
///
/// # Example
///
/// ```
/// use treesync::ProviderConfig;
///
/// let config = ProviderConfig {
///     root: "data".into(),
///     manifest_path: "state/manifest.txt".into(),
///     listen_addr: "127.0.0.1:8080".parse().unwrap(),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Directory whose files are published.
    pub root: PathBuf,
    /// Where the serialized manifest is persisted.
    pub manifest_path: PathBuf,
    /// Address the HTTP service binds to.
    pub listen_addr: SocketAddr,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            manifest_path: PathBuf::from("manifest.txt"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Configuration for the fetcher side.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local directory the tree is reconstructed under.
    pub local_root: PathBuf,
    /// Check each fetched file against its manifest hash before writing it (default: true).
    pub verify: bool,
    /// Maximum number of files in flight at once (default: 1, strictly sequential).
    pub max_concurrent_transfers: usize,
    /// Abort on the first failing file (default: true).
    ///
    /// When disabled every entry is attempted and the outcome of each one is
    /// returned in a [`SyncReport`].
    pub fail_fast: bool,
    /// Pause before re-fetching a file whose hash did not match.
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("data"),
            verify: true,
            max_concurrent_transfers: 1,
            fail_fast: true,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Result of syncing one manifest entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Synced { bytes: u64 },
    Failed { error: String },
}

/// Per-file report of one sync run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files: Vec<FileReport>,
}

/// Outcome for one path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Synced { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Synced { bytes } => bytes,
                FileOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}
