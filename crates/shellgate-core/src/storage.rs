//! Key-value storage adapters.
//!
//! The gateway persists through this narrow byte-level contract; the
//! filesystem implementation maps keys directly to paths so the on-disk
//! layout (`cron/jobs/{id}.json`) is stable and inspectable. Adapters are
//! assumed safe for concurrent use.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

/// Byte-level key-value contract.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    /// All keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// In-memory adapter for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Filesystem adapter rooted at a directory; keys map to relative paths.
pub struct FsKvStore {
    root: PathBuf,
}

impl FsKvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        // Keys are relative paths by contract; refuse traversal.
        if relative.components().any(|component| {
            matches!(component, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        }) {
            anyhow::bail!("invalid storage key: {key}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        // The prefix is a directory path plus an optional name fragment.
        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((dir, fragment)) => (self.root.join(dir), fragment.to_string()),
            None => (self.root.clone(), prefix.to_string()),
        };

        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(keys);
            }
            Err(error) => return Err(error.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&name_prefix) {
                let relative = entry
                    .path()
                    .strip_prefix(&self.root)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or(name);
                keys.push(relative);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise_roundtrip(store: &dyn KvStore) {
        assert!(store.get("cron/jobs/a.json").await.unwrap().is_none());

        store.put("cron/jobs/a.json", b"{\"id\":\"a\"}").await.unwrap();
        let loaded = store.get("cron/jobs/a.json").await.unwrap().unwrap();
        assert_eq!(loaded, b"{\"id\":\"a\"}");

        assert!(store.delete("cron/jobs/a.json").await.unwrap());
        assert!(!store.delete("cron/jobs/a.json").await.unwrap());
        assert!(store.get("cron/jobs/a.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        exercise_roundtrip(&MemoryKvStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        exercise_roundtrip(&FsKvStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_memory_list_prefix() {
        let store = MemoryKvStore::new();
        store.put("cron/jobs/a.json", b"1").await.unwrap();
        store.put("cron/jobs/b.json", b"2").await.unwrap();
        store.put("other/c.json", b"3").await.unwrap();

        let keys = store.list("cron/jobs/").await.unwrap();
        assert_eq!(keys, vec!["cron/jobs/a.json", "cron/jobs/b.json"]);
    }

    #[tokio::test]
    async fn test_fs_list_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path());
        store.put("cron/jobs/a.json", b"1").await.unwrap();
        store.put("cron/jobs/b.json", b"2").await.unwrap();
        store.put("cron/other.json", b"3").await.unwrap();

        let keys = store.list("cron/jobs/").await.unwrap();
        assert_eq!(keys, vec!["cron/jobs/a.json", "cron/jobs/b.json"]);
    }

    #[tokio::test]
    async fn test_fs_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path());
        assert!(store.list("cron/jobs/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path());
        assert!(store.get("../escape").await.is_err());
        assert!(store.put("/absolute", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_fs_layout_matches_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKvStore::new(dir.path());
        store.put("cron/jobs/j1.json", b"{}").await.unwrap();
        assert!(dir.path().join("cron/jobs/j1.json").is_file());
    }
}
