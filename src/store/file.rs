//! JSON file backend.
//!
//! # Example
//!
//! ```rust,no_run
//! use pg_watermark_sync::store::{FileWatermarkStore, WatermarkStore};
//! use pg_watermark_sync::types::{CursorValue, WatermarkKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileWatermarkStore::new("state/watermarks.json");
//!     let key = WatermarkKey::new("applications", "updated_at");
//!
//!     let lower_bound = store.get_or(&key, &CursorValue::epoch()).await?;
//!     println!("Resuming applications from {}", lower_bound);
//!
//!     store.set(&key, &CursorValue::parse("2024-01-02")).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::WatermarkStore;
use crate::types::{CursorValue, Watermark, WatermarkKey};
use crate::{Error, Result};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    watermarks: BTreeMap<String, Watermark>,
}

/// Stores all watermarks in one JSON document.
///
/// Writes go to a temporary file which is synced and then renamed over the
/// document, so a crash mid-write leaves the previous document intact.
/// Read-modify-write cycles are serialised per handle so concurrent commits
/// for different tables never drop each other's updates.
pub struct FileWatermarkStore {
    file_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    async fn load(&self) -> Result<StateDocument> {
        let content = match fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No watermark file found at {:?}", self.file_path);
                return Ok(StateDocument {
                    version: STATE_VERSION,
                    watermarks: BTreeMap::new(),
                });
            }
            Err(e) => {
                error!("Failed to read watermark file: {}", e);
                return Err(Error::store(format!(
                    "cannot read {}: {}",
                    self.file_path.display(),
                    e
                )));
            }
        };

        // A corrupt file must never fall back to the floor value.
        serde_json::from_str::<StateDocument>(&content).map_err(|e| {
            error!("Failed to parse watermark file: {}", e);
            Error::store(format!("invalid watermark file {}: {}", self.file_path.display(), e))
        })
    }

    async fn save(&self, document: &StateDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        self.write_atomically(json.as_bytes())
            .await
            .map_err(|e| Error::store(format!("cannot write {}: {}", self.file_path.display(), e)))
    }

    async fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.file_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Option<Watermark>> {
        let document = self.load().await?;
        Ok(document.watermarks.get(&key.to_string()).cloned())
    }

    async fn set(&self, key: &WatermarkKey, value: &CursorValue) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.load().await?;
        document.version = STATE_VERSION;
        document
            .watermarks
            .insert(key.to_string(), Watermark::new(key, value.clone()));
        self.save(&document).await?;

        debug!(watermark_key = %key, watermark = %value, "Watermark saved");
        Ok(())
    }

    async fn delete(&self, key: &WatermarkKey) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.load().await?;
        if document.watermarks.remove(&key.to_string()).is_none() {
            return Ok(false);
        }
        self.save(&document).await?;

        info!(watermark_key = %key, "Deleted watermark");
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let document = self.load().await?;
        Ok(document.watermarks.into_values().collect())
    }
}
