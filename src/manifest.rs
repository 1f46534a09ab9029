//! Manifest model and its line-oriented wire format.
//!
//! Each entry is written as `<relative path> <sha256 hex>\n`. There is no
//! header, count or trailer: the entry lines are the whole payload.

use crate::error::SyncError;
use crate::hash::ContentHash;
use crate::path::{RelativePath, FIELD_SEPARATOR};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// One regular file in the synchronized tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub relative_path: RelativePath,
    pub content_hash: ContentHash,
}

/// Point-in-time snapshot of a directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Builds a manifest, rejecting duplicate paths.
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self, SyncError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if !seen.insert(entry.relative_path.as_str()) {
                return Err(SyncError::ManifestFormat {
                    line: index + 1,
                    reason: format!("duplicate path {}", entry.relative_path),
                });
            }
        }
        Ok(Manifest { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    /// Encodes the manifest in its wire format.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * 96);
        for entry in &self.entries {
            out.push_str(entry.relative_path.as_str());
            out.push(FIELD_SEPARATOR);
            out.push_str(entry.content_hash.as_str());
            out.push('\n');
        }
        out
    }

    /// Decodes manifest bytes.
    ///
    /// A single trailing empty line is tolerated. The hash is the token after
    /// the last separator; everything before it is the path.
    pub fn parse(bytes: &[u8]) -> Result<Self, SyncError> {
        let text = std::str::from_utf8(bytes).map_err(|e| SyncError::ManifestFormat {
            line: 0,
            reason: format!("not valid UTF-8: {}", e),
        })?;

        let mut lines: Vec<&str> = text.split('\n').collect();
        if lines.last() == Some(&"") {
            lines.pop();
        }

        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            let line_no = index + 1;
            let format_error = |reason: String| SyncError::ManifestFormat {
                line: line_no,
                reason,
            };

            if line.is_empty() {
                return Err(format_error("empty line".to_string()));
            }
            let (path, hash) = line
                .rsplit_once(FIELD_SEPARATOR)
                .ok_or_else(|| format_error("missing field separator".to_string()))?;

            let relative_path =
                RelativePath::new(path).map_err(|e| format_error(e.to_string()))?;
            let content_hash = hash
                .parse::<ContentHash>()
                .map_err(|e| format_error(e.to_string()))?;

            entries.push(ManifestEntry {
                relative_path,
                content_hash,
            });
        }

        Manifest::new(entries)
    }

    /// Reads a persisted manifest.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let bytes = std::fs::read(path)?;
        Manifest::parse(&bytes)
    }

    /// Writes the manifest to its storage location, creating parent directories.
    pub fn persist(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.serialize())?;
        info!("Persisted manifest ({} entries) to {:?}", self.len(), path);
        Ok(())
    }
}
