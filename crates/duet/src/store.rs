//! JSON file snapshot store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use duet_core::Post;
use duet_timeline::{Snapshot, SnapshotError, SnapshotMeta, SnapshotStore};
use tracing::debug;

/// Default snapshot location under the user cache directory.
pub fn default_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("duet")
        .join("timeline.json")
}

/// Stores the timeline snapshot as one JSON document.
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, posts: &[Post], meta: &SnapshotMeta) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let snapshot = Snapshot {
            posts: posts.to_vec(),
            meta: meta.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        // Atomic replace.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), posts = posts.len(), "wrote snapshot");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use duet_core::{Cursor, Network};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nope.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested").join("timeline.json"));

        let mut meta = SnapshotMeta {
            cursors: Default::default(),
            newest_ids: Default::default(),
            last_saved: Utc::now(),
        };
        meta.cursors.insert(Network::Mastodon, Cursor::new("123"));
        store.save(&[], &meta).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.posts.is_empty());
        assert_eq!(loaded.meta, meta);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonSnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Json(_)));
    }
}
