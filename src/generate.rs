//! Seeds a provider root with random test data.

use crate::error::SyncError;
use crate::path::RelativePath;
use rand::RngCore;
use std::path::Path;
use tracing::info;

/// Files written by `serve --seed`.
pub const DEFAULT_SEED_FILES: &[&str] = &[
    "top.txt",
    "middle/middle.txt",
    "middle/bottom/bottom.txt",
];

/// Size of each seeded file.
pub const DEFAULT_SEED_SIZE: usize = 500_000;

/// Writes each of `files` below `root`, filled with `size` random bytes.
///
/// Existing files at those paths are replaced.
pub fn generate_tree(root: &Path, files: &[&str], size: usize) -> Result<(), SyncError> {
    let mut rng = rand::thread_rng();
    let mut buffer = vec![0u8; size];

    for file in files {
        let relative_path = RelativePath::new(*file)?;
        let local = relative_path.to_local(root);
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }

        rng.fill_bytes(&mut buffer);
        std::fs::write(&local, &buffer)?;
    }

    info!("Seeded {} files of {} bytes under {:?}", files.len(), size, root);
    Ok(())
}
