//! SHA-256 content hashing.

use crate::error::SyncError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Hex-encoded SHA-256 digest of a file's full content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(digest: impl AsRef<[u8]>) -> Self {
        ContentHash(hex::encode(digest))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SyncError::InvalidHash(s.to_string()));
        }
        Ok(ContentHash(s.to_ascii_lowercase()))
    }
}

/// Hashes an in-memory payload.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::from_digest(Sha256::digest(bytes))
}

/// Hashes everything `reader` yields, reading it exactly once.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<ContentHash, SyncError> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ContentHash::from_digest(hasher.finalize()))
}

/// Computes the SHA-256 of a local file on the calling thread.
pub fn hash_file(path: &Path) -> Result<ContentHash, SyncError> {
    let file = std::fs::File::open(path)?;
    hash_reader(std::io::BufReader::with_capacity(READ_BUFFER_SIZE, file))
}

/// Computes the SHA-256 of a local file.
///
/// The file is read on the blocking pool so large files don't stall the
/// async runtime.
pub async fn compute_file_sha256(path: &Path) -> Result<ContentHash, SyncError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?
}
