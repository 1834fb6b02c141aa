//! # Snapshot Store
//!
//! Best-effort key/value persistence of engine state as JSON blobs.
//! Callers go through [`load_snapshot`] / [`save_snapshot`], which log
//! failures and carry on.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const PERFORMANCE_KEY: &str = "performance";
pub const SLOW_QUERIES_KEY: &str = "slow_queries";
pub const QUERY_HISTORY_KEY: &str = "query_history";

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>>;
    async fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// One `<dir>/<key>.json` file per key.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(key);
        let temp_path = self
            .dir
            .join(format!("{key}.json.tmp.{}", std::process::id()));

        let bytes = serde_json::to_vec_pretty(value)?;
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}

/// `None` when the key is absent, unreadable, or of the wrong shape.
pub async fn load_snapshot<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str) -> Option<T> {
    match store.load(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Ignoring malformed snapshot '{}': {}", key, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Failed to load snapshot '{}': {}", key, e);
            None
        }
    }
}

pub async fn save_snapshot<T: Serialize>(store: &dyn SnapshotStore, key: &str, snapshot: &T) {
    let value = match serde_json::to_value(snapshot) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to serialize snapshot '{}': {}", key, e);
            return;
        }
    };
    if let Err(e) = store.save(key, &value).await {
        tracing::warn!("Failed to save snapshot '{}': {}", key, e);
    }
}
