//! Fetcher side: reconstructs a tree locally from a provider's manifest.

use crate::error::SyncError;
use crate::hash::compute_file_sha256;
use crate::manifest::{Manifest, ManifestEntry};
use crate::path::RelativePath;
use crate::transport::TransferEndpoint;
use crate::types::{FileOutcome, FileReport, SyncConfig, SyncReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_retry2::{Retry, RetryError};
use tracing::{error, info, warn};

const PARTIAL_SUFFIX: &str = ".treesync-partial";

/// Downloads every file listed in a manifest and writes it below a local root.
pub struct SyncClient<E> {
    endpoint: Arc<E>,
    config: SyncConfig,
    progress: Option<indicatif::ProgressBar>,
}

impl<E: TransferEndpoint + 'static> SyncClient<E> {
    pub fn new(endpoint: E, config: SyncConfig) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            config,
            progress: None,
        }
    }

    /// Reports each settled file on `pb`. Its length is set once the manifest is known.
    pub fn with_progress(mut self, pb: indicatif::ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetches the manifest from the endpoint, then syncs every entry.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use treesync::{HttpEndpoint, SyncClient, SyncConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let endpoint = HttpEndpoint::new("http://localhost:8080", None)?;
    /// let client = SyncClient::new(endpoint, SyncConfig::default());
    /// let report = client.run().await?;
    /// println!("synced {} files", report.synced());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        info!("Retrieving manifest");
        let manifest_bytes = self
            .endpoint
            .fetch_manifest()
            .await
            .map_err(SyncError::in_manifest_phase)?;
        self.sync(&manifest_bytes).await
    }

    /// Parses `manifest_bytes` and reconstructs every entry below the local root.
    ///
    /// With `fail_fast` the first failing file aborts the run; files written
    /// before it are left in place. Otherwise every entry is attempted and
    /// failures are recorded in the returned report.
    pub async fn sync(&self, manifest_bytes: &[u8]) -> Result<SyncReport, SyncError> {
        let manifest = Manifest::parse(manifest_bytes).map_err(SyncError::in_manifest_phase)?;
        info!(
            "Syncing {} files into {:?}",
            manifest.len(),
            self.config.local_root
        );

        tokio::fs::create_dir_all(&self.config.local_root)
            .await
            .map_err(|source| SyncError::LocalRoot {
                path: self.config.local_root.clone(),
                source,
            })?;
        if let Some(pb) = &self.progress {
            pb.set_length(manifest.len() as u64);
        }

        let report = if self.config.max_concurrent_transfers <= 1 {
            self.sync_sequential(manifest).await?
        } else {
            self.sync_concurrent(manifest).await?
        };

        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!("Synced {} files", report.synced()));
        }
        info!(
            "Synced {} of {} files ({} bytes)",
            report.synced(),
            report.files.len(),
            report.total_bytes()
        );
        Ok(report)
    }

    async fn sync_sequential(&self, manifest: Manifest) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        for entry in manifest.entries() {
            self.announce(&entry.relative_path);
            let result = transfer_entry(&*self.endpoint, entry, &self.config).await;
            report.files.push(self.settle(&entry.relative_path, result)?);
        }
        Ok(report)
    }

    async fn sync_concurrent(&self, manifest: Manifest) -> Result<SyncReport, SyncError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers));
        let config = Arc::new(self.config.clone());
        let total = manifest.len();
        let mut tasks = JoinSet::new();

        for (index, entry) in manifest.into_entries().into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let endpoint = Arc::clone(&self.endpoint);
            let config = Arc::clone(&config);

            tasks.spawn(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        info!("Downloading {}", entry.relative_path);
                        transfer_entry(&*endpoint, &entry, &config).await
                    }
                    Err(e) => Err(SyncError::TaskFailed(e.to_string())),
                };
                (index, entry.relative_path, result)
            });
        }

        // Slots keep the report in manifest order whatever order tasks finish in.
        let mut slots: Vec<Option<FileReport>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            let (index, path, result) =
                joined.map_err(|e| SyncError::TaskFailed(e.to_string()))?;
            // Returning early drops the JoinSet, which aborts the remaining transfers.
            slots[index] = Some(self.settle(&path, result)?);
        }

        Ok(SyncReport {
            files: slots.into_iter().flatten().collect(),
        })
    }

    fn announce(&self, path: &RelativePath) {
        info!("Downloading {}", path);
        if let Some(pb) = &self.progress {
            pb.set_message(format!("| Downloading: {}", path));
        }
    }

    fn settle(
        &self,
        path: &RelativePath,
        result: Result<u64, SyncError>,
    ) -> Result<FileReport, SyncError> {
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }

        let outcome = match result {
            Ok(bytes) => FileOutcome::Synced { bytes },
            Err(e) if self.config.fail_fast => {
                error!("Failed to sync {}: {}", path, e);
                if let Some(pb) = &self.progress {
                    pb.abandon_with_message("Sync failed!");
                }
                return Err(e.for_file(path.as_str()));
            }
            Err(e) => {
                warn!("Failed to sync {}: {}", path, e);
                FileOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        Ok(FileReport {
            path: path.to_string(),
            outcome,
        })
    }
}

/// Fetches one entry, stages it next to its destination and moves it into place.
///
/// With verification on, the staged file is re-hashed from disk and compared
/// to the manifest; a mismatch is retried once before it becomes an error.
async fn transfer_entry<E: TransferEndpoint + ?Sized>(
    endpoint: &E,
    entry: &ManifestEntry,
    config: &SyncConfig,
) -> Result<u64, SyncError> {
    let dest = entry.relative_path.to_local(&config.local_root);
    let staged = partial_path(&dest);
    let mut guard = StagedFile::new(&staged);
    let staged_path: &Path = &staged;

    let size = if config.verify {
        let retry_strategy = tokio_retry2::strategy::FixedInterval::from_millis(
            config.retry_delay.as_millis() as u64,
        )
        .take(1);

        let attempt = move || async move {
            match fetch_and_stage(endpoint, entry, staged_path, true).await {
                Ok(size) => Ok(size),
                Err(e @ SyncError::HashMismatch { .. }) => {
                    warn!("Hash check failed for {}: {}", entry.relative_path, e);
                    RetryError::to_transient(e)
                }
                Err(e) => RetryError::to_permanent(e),
            }
        };
        Retry::spawn(retry_strategy, attempt).await?
    } else {
        fetch_and_stage(endpoint, entry, staged_path, false).await?
    };

    tokio::fs::rename(&staged, &dest).await?;
    guard.commit();
    Ok(size)
}

/// Removes a staged download on drop unless it was moved into place.
///
/// Covers error returns as well as transfers aborted mid-write.
struct StagedFile<'a> {
    path: &'a Path,
    committed: bool,
}

impl<'a> StagedFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for StagedFile<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(self.path);
        }
    }
}

async fn fetch_and_stage<E: TransferEndpoint + ?Sized>(
    endpoint: &E,
    entry: &ManifestEntry,
    staged: &Path,
    verify: bool,
) -> Result<u64, SyncError> {
    // Nothing touches the local tree until the provider has answered.
    let bytes = endpoint.fetch_file(&entry.relative_path).await?;

    if let Some(parent) = staged.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = BufWriter::new(tokio::fs::File::create(staged).await?);
    file.write_all(&bytes).await?;
    file.flush().await?;
    drop(file);

    if verify {
        let actual = compute_file_sha256(staged).await?;
        if actual != entry.content_hash {
            return Err(SyncError::HashMismatch {
                path: entry.relative_path.to_string(),
                expected: entry.content_hash.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    Ok(bytes.len() as u64)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider stand-in serving files from memory.
    #[derive(Default)]
    struct MemoryEndpoint {
        manifest: Option<Vec<u8>>,
        files: HashMap<String, Vec<u8>>,
        corrupt: Mutex<HashMap<String, usize>>,
        requests: AtomicUsize,
    }

    impl MemoryEndpoint {
        fn with_files(files: &[(&str, &[u8])]) -> Self {
            let files: HashMap<String, Vec<u8>> = files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_vec()))
                .collect();
            let mut manifest = String::new();
            let mut paths: Vec<&String> = files.keys().collect();
            paths.sort();
            for path in paths {
                manifest.push_str(&format!("{} {}\n", path, hash_bytes(&files[path])));
            }
            Self {
                manifest: Some(manifest.into_bytes()),
                files,
                ..Default::default()
            }
        }

        /// Serves garbage for `path` the next `times` requests.
        fn corrupt(self, path: &str, times: usize) -> Self {
            self.corrupt.lock().unwrap().insert(path.to_string(), times);
            self
        }
    }

    #[async_trait]
    impl TransferEndpoint for MemoryEndpoint {
        async fn fetch_manifest(&self) -> Result<Vec<u8>, SyncError> {
            self.manifest
                .clone()
                .ok_or_else(|| SyncError::NotFound("manifest".to_string()))
        }

        async fn fetch_file(&self, path: &RelativePath) -> Result<Vec<u8>, SyncError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            {
                let mut corrupt = self.corrupt.lock().unwrap();
                if let Some(left) = corrupt.get_mut(path.as_str()) {
                    if *left > 0 {
                        *left -= 1;
                        return Ok(b"corrupted".to_vec());
                    }
                }
            }
            self.files
                .get(path.as_str())
                .cloned()
                .ok_or_else(|| SyncError::NotFound(path.to_string()))
        }
    }

    fn config(root: &Path) -> SyncConfig {
        SyncConfig {
            local_root: root.to_path_buf(),
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    const TREE: &[(&str, &[u8])] = &[
        ("top.txt", b"top content"),
        ("middle/middle.txt", b"middle content"),
        ("middle/bottom/bottom.txt", b"bottom content"),
    ];

    fn files_under(root: &Path) -> HashSet<String> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                RelativePath::from_fs_path(root, e.path())
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sync_reconstructs_tree() {
        let dest = tempfile::tempdir().unwrap();
        let client = SyncClient::new(MemoryEndpoint::with_files(TREE), config(dest.path()));

        let report = client.run().await.unwrap();

        assert_eq!(report.synced(), 3);
        for (path, content) in TREE {
            assert_eq!(std::fs::read(dest.path().join(path)).unwrap(), *content);
        }
        assert_eq!(files_under(dest.path()).len(), 3);
    }

    #[tokio::test]
    async fn test_sync_overwrites_existing_files() {
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(dest.path().join("top.txt"), vec![b'x'; 4096]).unwrap();
        let client = SyncClient::new(MemoryEndpoint::with_files(TREE), config(dest.path()));

        client.run().await.unwrap();

        assert_eq!(
            std::fs::read(dest.path().join("top.txt")).unwrap(),
            b"top content"
        );
    }

    #[tokio::test]
    async fn test_missing_file_aborts_without_partial_file() {
        let dest = tempfile::tempdir().unwrap();
        let mut endpoint = MemoryEndpoint::with_files(TREE);
        endpoint.files.remove("middle/middle.txt");
        let client = SyncClient::new(endpoint, config(dest.path()));

        let err = client.run().await.unwrap_err();

        assert!(err.is_not_found());
        assert!(matches!(&err, SyncError::File { path, .. } if path == "middle/middle.txt"));
        assert!(!dest.path().join("middle/middle.txt").exists());
        // Already-written files are not rolled back; later ones were never attempted.
        assert!(dest.path().join("middle/bottom/bottom.txt").exists());
        assert!(!dest.path().join("top.txt").exists());
    }

    #[tokio::test]
    async fn test_collects_failures_when_not_fail_fast() {
        let dest = tempfile::tempdir().unwrap();
        let mut endpoint = MemoryEndpoint::with_files(TREE);
        endpoint.files.remove("middle/middle.txt");
        let client = SyncClient::new(
            endpoint,
            SyncConfig {
                fail_fast: false,
                ..config(dest.path())
            },
        );

        let report = client.run().await.unwrap();

        assert_eq!(report.synced(), 2);
        let failures: Vec<_> = report.failures().map(|f| f.path.as_str()).collect();
        assert_eq!(failures, ["middle/middle.txt"]);
        assert!(dest.path().join("top.txt").exists());
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_retried_once() {
        let dest = tempfile::tempdir().unwrap();
        let endpoint = MemoryEndpoint::with_files(TREE).corrupt("top.txt", 1);
        let client = SyncClient::new(endpoint, config(dest.path()));

        client.run().await.unwrap();

        assert_eq!(
            std::fs::read(dest.path().join("top.txt")).unwrap(),
            b"top content"
        );
        assert_eq!(client.endpoint.requests.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_persistent_mismatch_fails() {
        let dest = tempfile::tempdir().unwrap();
        let endpoint = MemoryEndpoint::with_files(TREE).corrupt("top.txt", 2);
        let client = SyncClient::new(endpoint, config(dest.path()));

        let err = client.run().await.unwrap_err();

        match err {
            SyncError::File { path, source } => {
                assert_eq!(path, "top.txt");
                assert!(matches!(*source, SyncError::HashMismatch { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dest.path().join("top.txt").exists());
        assert!(!partial_path(&dest.path().join("top.txt")).exists());
    }

    #[tokio::test]
    async fn test_unverified_sync_writes_bytes_as_received() {
        let dest = tempfile::tempdir().unwrap();
        let endpoint = MemoryEndpoint::with_files(TREE).corrupt("top.txt", 1);
        let client = SyncClient::new(
            endpoint,
            SyncConfig {
                verify: false,
                ..config(dest.path())
            },
        );

        client.run().await.unwrap();

        assert_eq!(
            std::fs::read(dest.path().join("top.txt")).unwrap(),
            b"corrupted"
        );
    }

    #[tokio::test]
    async fn test_concurrent_transfers() {
        let dest = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..20).map(|i| format!("dir{}/file{}.bin", i % 3, i)).collect();
        let contents: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 1000 + i as usize]).collect();
        let tree: Vec<(&str, &[u8])> = names
            .iter()
            .zip(&contents)
            .map(|(n, c)| (n.as_str(), c.as_slice()))
            .collect();
        let client = SyncClient::new(
            MemoryEndpoint::with_files(&tree),
            SyncConfig {
                max_concurrent_transfers: 4,
                ..config(dest.path())
            },
        );

        let report = client.run().await.unwrap();

        assert_eq!(report.synced(), 20);
        let mut reported: Vec<&str> = report.files.iter().map(|f| f.path.as_str()).collect();
        let mut expected: Vec<&str> = names.iter().map(String::as_str).collect();
        // Report follows manifest order, which is sorted here.
        expected.sort();
        assert_eq!(reported, expected);
        reported.dedup();
        assert_eq!(reported.len(), 20);
        for (name, content) in &tree {
            assert_eq!(std::fs::read(dest.path().join(name)).unwrap(), *content);
        }
    }

    #[tokio::test]
    async fn test_empty_manifest_creates_nothing() {
        let dest = tempfile::tempdir().unwrap();
        let client = SyncClient::new(MemoryEndpoint::with_files(&[]), config(dest.path()));

        let report = client.run().await.unwrap();

        assert!(report.files.is_empty());
        assert!(files_under(dest.path()).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_manifest_fails_in_manifest_phase() {
        let dest = tempfile::tempdir().unwrap();
        let client = SyncClient::new(MemoryEndpoint::default(), config(dest.path()));

        let err = client.sync(b"no-hash-here\n").await.unwrap_err();
        assert!(matches!(err, SyncError::Manifest(_)));

        let err = client.sync(b"../../etc/passwd abc\n").await.unwrap_err();
        assert!(matches!(err, SyncError::Manifest(_)));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_reported_as_manifest_phase() {
        let dest = tempfile::tempdir().unwrap();
        let client = SyncClient::new(MemoryEndpoint::default(), config(dest.path()));

        let err = client.run().await.unwrap_err();
        assert!(matches!(err, SyncError::Manifest(_)));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_staged_file() {
        let dest = tempfile::tempdir().unwrap();
        // A non-empty directory where `top.txt` should go makes the final rename fail.
        std::fs::create_dir_all(dest.path().join("top.txt/occupied")).unwrap();
        let client = SyncClient::new(MemoryEndpoint::with_files(TREE), config(dest.path()));

        let err = client.run().await.unwrap_err();

        assert!(matches!(&err, SyncError::File { path, .. } if path == "top.txt"));
        assert!(!partial_path(&dest.path().join("top.txt")).exists());
    }

    /// Endpoint whose file requests never complete.
    struct StalledEndpoint;

    #[async_trait]
    impl TransferEndpoint for StalledEndpoint {
        async fn fetch_manifest(&self) -> Result<Vec<u8>, SyncError> {
            Ok(Vec::new())
        }

        async fn fetch_file(&self, _path: &RelativePath) -> Result<Vec<u8>, SyncError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_aborted_transfer_leaves_no_staged_file() {
        let dest = tempfile::tempdir().unwrap();
        let manifest = Manifest::parse(&MemoryEndpoint::with_files(TREE).manifest.unwrap()).unwrap();
        let entry = manifest
            .entries()
            .iter()
            .find(|e| e.relative_path.as_str() == "top.txt")
            .unwrap();
        let cfg = config(dest.path());
        let staged = partial_path(&entry.relative_path.to_local(dest.path()));
        // Left over from an earlier attempt at the same file.
        std::fs::write(&staged, b"half written").unwrap();

        let transfer = transfer_entry(&StalledEndpoint, entry, &cfg);
        assert!(tokio::time::timeout(Duration::from_millis(20), transfer)
            .await
            .is_err());

        assert!(!staged.exists());
    }

    #[test]
    fn test_staged_file_guard() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.treesync-partial");
        let kept = dir.path().join("kept.treesync-partial");
        std::fs::write(&dropped, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();

        drop(StagedFile::new(&dropped));
        let mut guard = StagedFile::new(&kept);
        guard.commit();
        drop(guard);

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_unusable_local_root_names_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let root = blocker.join("mirror");
        let client = SyncClient::new(MemoryEndpoint::with_files(TREE), config(&root));

        match client.run().await.unwrap_err() {
            SyncError::LocalRoot { path, .. } => assert_eq!(path, root),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partial_path_is_sibling() {
        let dest = Path::new("/root/a/b.txt");
        assert_eq!(
            partial_path(dest),
            Path::new("/root/a/b.txt.treesync-partial")
        );
    }
}
