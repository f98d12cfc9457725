use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::WatermarkStore;
use crate::types::{CursorValue, Watermark, WatermarkKey};
use crate::Result;

/// Process-local store, for dry runs and tests.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    watermarks: RwLock<BTreeMap<WatermarkKey, Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Option<Watermark>> {
        Ok(self.watermarks.read().await.get(key).cloned())
    }

    async fn set(&self, key: &WatermarkKey, value: &CursorValue) -> Result<()> {
        self.watermarks
            .write()
            .await
            .insert(key.clone(), Watermark::new(key, value.clone()));
        Ok(())
    }

    async fn delete(&self, key: &WatermarkKey) -> Result<bool> {
        Ok(self.watermarks.write().await.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        Ok(self.watermarks.read().await.values().cloned().collect())
    }
}
