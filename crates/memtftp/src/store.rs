//! In-memory blob store shared by every transfer worker.
//!
//! Values are opaque byte blobs keyed by filename. A `put` replaces the whole
//! value under the write lock, so readers observe either the old blob or the
//! new one, never a partial write.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a blob. `None` means the name was never written.
    pub async fn get(&self, filename: &str) -> Option<Bytes> {
        self.files.read().await.get(filename).cloned()
    }

    /// Store a blob, replacing any previous value for `filename`.
    pub async fn put(&self, filename: impl Into<String>, data: impl Into<Bytes>) {
        let filename = filename.into();
        let data = data.into();
        debug!(filename = %filename, bytes = data.len(), "Storing blob");
        self.files.write().await.insert(filename, data);
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.files.read().await.contains_key(filename)
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// Seed the store with every regular file directly inside `dir`, keyed by
    /// file name. Subdirectories and non-UTF-8 names are skipped.
    pub async fn preload_dir(&self, dir: &Path) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            let data = tokio::fs::read(entry.path()).await?;
            self.put(name, data).await;
            loaded += 1;
        }

        info!(dir = %dir.display(), files = loaded, "Preloaded store");
        Ok(loaded)
    }
}
