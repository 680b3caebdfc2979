//! Process-wide persisted key-value state.
//!
//! Values are plain strings, like the device storage the rest of the client
//! reads. The playback mirror is the only writer of its keys; anything else
//! may read them at any time.

pub mod mirror;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use tokio::sync::Mutex;

pub use mirror::{PlaybackStateMirror, PlaybackStateRecord};

/// One pending change: `Some` sets the key, `None` removes it.
pub type Entry = (String, Option<String>);

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Applies every change, in order, as one write.
    async fn write_batch(&self, entries: Vec<Entry>) -> Result<()>;
}

fn apply(map: &mut BTreeMap<String, String>, entries: Vec<Entry>) {
    for (key, value) in entries {
        match value {
            Some(value) => map.insert(key, value),
            None => map.remove(&key),
        };
    }
}

/// A JSON object on disk, rewritten in full on every batch.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Sibling file a batch is written to before it replaces the state file,
    /// so readers never see a partial write.
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// A missing or unreadable file reads as empty.
    async fn load(&self) -> BTreeMap<String, String> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };

        serde_json::from_slice(&contents).unwrap_or_else(|e| {
            tracing::warn!("Ignoring corrupt state file {}: {}", self.path.display(), e);
            BTreeMap::new()
        })
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await.remove(key))
    }

    async fn write_batch(&self, entries: Vec<Entry>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await;
        apply(&mut map, entries);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let contents = serde_json::to_vec_pretty(&map)?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, contents)
            .await
            .with_context(|| format!("Could not write {}", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Could not replace {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn write_batch(&self, entries: Vec<Entry>) -> Result<()> {
        apply(&mut *self.map.lock().await, entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, value: &str) -> Entry {
        (key.to_string(), Some(value.to_string()))
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("state.json");

        FileStore::new(&path)
            .write_batch(vec![set("lastSong", "Song A"), set("isPlaying", "true")])
            .await
            .unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("lastSong").await.unwrap().as_deref(), Some("Song A"));
        assert_eq!(reopened.get("isPlaying").await.unwrap().as_deref(), Some("true"));
        assert_eq!(reopened.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn removals_delete_keys() {
        let store = MemoryStore::new();
        store.write_batch(vec![set("lastSongId", "7")]).await.unwrap();
        store
            .write_batch(vec![("lastSongId".to_string(), None)])
            .await
            .unwrap();
        assert_eq!(store.get("lastSongId").await.unwrap(), None);
    }

    #[tokio::test]
    async fn batches_replace_the_file_without_leaving_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::new(&path);

        store.write_batch(vec![set("lastSong", "Song A")]).await.unwrap();
        store.write_batch(vec![set("lastSong", "Song B")]).await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["state.json".to_string()]);

        let on_disk: BTreeMap<String, String> =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk.get("lastSong").map(String::as_str), Some("Song B"));
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get("lastSong").await.unwrap(), None);

        store.write_batch(vec![set("lastSong", "Song B")]).await.unwrap();
        assert_eq!(store.get("lastSong").await.unwrap().as_deref(), Some("Song B"));
    }
}
