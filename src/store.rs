//! Object store abstraction and filesystem backend.
//!
//! All pipeline state — extracted documents, chunks, batch inputs, job
//! metadata, reconciled results — lives in one logical store addressed by
//! `/`-separated keys. The [`ObjectStore`] trait is the seam between the
//! pipeline and the backend: a local directory for development and tests,
//! S3 in deployment ([`crate::store_s3`]).
//!
//! `put_if_absent` is the only conditional operation and must be atomic
//! in every backend; the submission guard and the processed marker both
//! depend on it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Store layout. Keys are stable contracts: the poll tick reconstructs
/// all pending work by listing these prefixes, with no state elsewhere.
/// Documents, chunks, and results live under the owning project's
/// namespace; two projects never share a key.
pub mod keys {
    /// Batch job directories, one per submitted job. Job ids are
    /// provider-global, so this prefix is not project-scoped.
    pub const BATCH_PREFIX: &str = "batch/";

    /// Extraction output, one JSON document per source file.
    pub fn extracted(project: &str, document: &str) -> String {
        format!("{}/extracted/{}.json", project, document)
    }

    pub fn extracted_prefix(project: &str) -> String {
        format!("{}/extracted/", project)
    }

    /// Persisted chunk, zero-padded so lexicographic listing order is
    /// chunk order.
    pub fn chunk(project: &str, document: &str, index: usize) -> String {
        format!("{}/chunks/{}_chunk_{:03}.json", project, document, index)
    }

    pub fn chunk_prefix(project: &str, document: &str) -> String {
        format!("{}/chunks/{}_chunk_", project, document)
    }

    pub fn batch_input(job_id: &str) -> String {
        format!("batch/{}/requests.jsonl", job_id)
    }

    pub fn batch_info(job_id: &str) -> String {
        format!("batch/{}/info.json", job_id)
    }

    /// Submission guard. At most one non-terminal job exists for a
    /// project while its guard key does.
    pub fn pending_guard(project: &str) -> String {
        format!("batch/pending/{}.json", project)
    }

    pub fn category_results(project: &str, category: &str) -> String {
        format!("{}/results/{}.json", project, category)
    }

    pub fn processed_marker(project: &str, job_id: &str) -> String {
        format!("{}/results/batches/{}/processed.json", project, job_id)
    }
}

/// Backend-neutral object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object, replacing any existing content.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Write an object only if the key does not exist. Returns `true`
    /// when this call created the object, `false` when it already
    /// existed. Atomic with respect to concurrent callers.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool>;

    /// List all keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed store rooted at a local directory. Keys map directly
/// to relative paths.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn ensure_parent(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path_for(key).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for key '{}'", key))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read key '{}'", key)),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.ensure_parent(key).await?;
        tokio::fs::write(self.path_for(key), data)
            .await
            .with_context(|| format!("Failed to write key '{}'", key))
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        use tokio::io::AsyncWriteExt;

        self.ensure_parent(key).await?;
        // create_new is the atomicity primitive: exactly one concurrent
        // caller wins the create.
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(key))
            .await
        {
            Ok(mut file) => {
                file.write_all(data)
                    .await
                    .with_context(|| format!("Failed to write key '{}'", key))?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to create key '{}'", key)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        // walkdir is synchronous; the store roots are small metadata trees.
        let mut keys: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .filter(|key| key.starts_with(&prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete key '{}'", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.get("missing.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.put("a/b/c.json", b"{\"x\":1}").await.unwrap();
        assert_eq!(store.get("a/b/c.json").await.unwrap().unwrap(), b"{\"x\":1}");
        assert!(store.exists("a/b/c.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_if_absent_only_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.put_if_absent("guard.json", b"first").await.unwrap());
        assert!(!store.put_if_absent("guard.json", b"second").await.unwrap());
        // Loser must not overwrite.
        assert_eq!(store.get("guard.json").await.unwrap().unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_list_sorted_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.put("chunks/doc_chunk_001.json", b"1").await.unwrap();
        store.put("chunks/doc_chunk_000.json", b"0").await.unwrap();
        store.put("extracted/doc.json", b"e").await.unwrap();
        let keys = store.list("chunks/").await.unwrap();
        assert_eq!(
            keys,
            vec!["chunks/doc_chunk_000.json", "chunks/doc_chunk_001.json"]
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.put("x.json", b"x").await.unwrap();
        store.delete("x.json").await.unwrap();
        store.delete("x.json").await.unwrap();
        assert!(!store.exists("x.json").await.unwrap());
    }

    #[test]
    fn test_chunk_key_zero_padded() {
        assert_eq!(
            keys::chunk("CFA009660", "ROP-1", 7),
            "CFA009660/chunks/ROP-1_chunk_007.json"
        );
        assert_eq!(
            keys::chunk("CFA009660", "ROP-1", 123),
            "CFA009660/chunks/ROP-1_chunk_123.json"
        );
    }

    #[test]
    fn test_layout_keys_scoped_to_project() {
        for (a, b) in [
            (
                keys::extracted("CFA-A", "DOC-1"),
                keys::extracted("CFA-B", "DOC-1"),
            ),
            (
                keys::chunk("CFA-A", "DOC-1", 0),
                keys::chunk("CFA-B", "DOC-1", 0),
            ),
            (
                keys::category_results("CFA-A", "audit"),
                keys::category_results("CFA-B", "audit"),
            ),
            (
                keys::processed_marker("CFA-A", "job-1"),
                keys::processed_marker("CFA-B", "job-1"),
            ),
        ] {
            assert_ne!(a, b);
            assert!(a.starts_with("CFA-A/"));
        }
    }
}
