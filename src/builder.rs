//! Manifest construction from a directory walk.

use crate::error::SyncError;
use crate::hash::hash_file;
use crate::manifest::{Manifest, ManifestEntry};
use crate::path::RelativePath;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Walks `root` and hashes every regular file below it.
///
/// Directories are descended into but never listed. Entries come out in
/// walk order, with siblings sorted by name, so two builds of an unchanged
/// tree produce the same manifest.
///
/// The build is all-or-nothing: an unreadable entry, a symbolic link or a
/// special file (socket, FIFO, device) fails the whole build instead of
/// yielding a manifest that under-reports the tree.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use treesync::build_manifest;
///
/// let manifest = build_manifest(Path::new("data"))?;
/// println!("{}", manifest.serialize());
/// # Ok::<(), treesync::SyncError>(())
/// ```
pub fn build_manifest(root: &Path) -> Result<Manifest, SyncError> {
    let root_metadata = std::fs::metadata(root)?;
    if !root_metadata.is_dir() {
        return Err(SyncError::InvalidPath {
            path: root.display().to_string(),
            reason: "manifest root is not a directory".to_string(),
        });
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() {
            return Err(SyncError::UnsupportedEntry {
                path: entry.path().to_path_buf(),
                kind: "symbolic link",
            });
        }
        if !file_type.is_file() {
            return Err(SyncError::UnsupportedEntry {
                path: entry.path().to_path_buf(),
                kind: "special file",
            });
        }

        let relative_path = RelativePath::from_fs_path(root, entry.path())?;
        let content_hash =
            hash_file(entry.path()).map_err(|e| e.for_file(relative_path.as_str()))?;
        debug!("{} {}", relative_path, content_hash);

        entries.push(ManifestEntry {
            relative_path,
            content_hash,
        });
    }

    let manifest = Manifest::new(entries)?;
    info!("Built manifest for {:?}: {} files", root, manifest.len());
    Ok(manifest)
}
