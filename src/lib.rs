//! TreeSync - mirror a directory tree from a provider to a fetcher
//!
//! The provider walks a directory, hashes every regular file with SHA-256 and
//! publishes a manifest of `<relative path> <hash>` lines. The fetcher pulls the
//! manifest, then each listed file, and rebuilds the tree under a local root.
//!
//! # Features
//!
//! - **Deterministic Manifests**: sorted walk, `/`-normalized paths on every platform
//! - **Integrity Checks**: fetched files are re-hashed and compared to the manifest
//! - **Safe Paths**: traversal and absolute paths are refused on both sides
//! - **Bounded Concurrency**: optional worker pool for transfers
//!
//! # Example
//!
//! ```no_run
//! use treesync::{HttpEndpoint, SyncClient, SyncConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = HttpEndpoint::new("http://localhost:8080", None)?;
//! let config = SyncConfig {
//!     local_root: "mirror".into(),
//!     ..Default::default()
//! };
//! SyncClient::new(endpoint, config).run().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod error;
mod generate;
mod hash;
mod manifest;
mod path;
mod provider;
mod sync;
mod transport;
mod types;

pub use builder::build_manifest;
pub use error::SyncError;
pub use generate::{generate_tree, DEFAULT_SEED_FILES, DEFAULT_SEED_SIZE};
pub use hash::{compute_file_sha256, hash_bytes, hash_file, hash_reader, ContentHash};
pub use manifest::{Manifest, ManifestEntry};
pub use path::RelativePath;
pub use provider::{create_router, serve, ProviderState};
pub use sync::SyncClient;
pub use transport::{HttpEndpoint, TransferEndpoint};
pub use types::{FileOutcome, FileReport, ProviderConfig, SyncConfig, SyncReport};
