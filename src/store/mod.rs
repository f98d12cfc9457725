//! Durable watermark storage.
//!
//! A [`WatermarkStore`] maps `(table, cursor_column)` to the highest cursor
//! value known to be fully delivered. Every backend makes `set` all or
//! nothing: a concurrent or later `get` sees either the old value or the new
//! one, never a partial write. Backend failures surface as
//! [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).

mod file;
mod memory;
mod postgres;

pub use file::FileWatermarkStore;
pub use memory::MemoryWatermarkStore;
pub use postgres::PostgresWatermarkStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, StateConfig};
use crate::types::{CursorValue, Watermark, WatermarkKey};
use crate::Result;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Returns the stored watermark, or `None` if the table was never committed.
    async fn get(&self, key: &WatermarkKey) -> Result<Option<Watermark>>;

    /// Overwrites the watermark for `key`.
    async fn set(&self, key: &WatermarkKey, value: &CursorValue) -> Result<()>;

    /// Removes the watermark for `key`; returns whether one existed.
    async fn delete(&self, key: &WatermarkKey) -> Result<bool>;

    /// All stored watermarks, ordered by key.
    async fn list(&self) -> Result<Vec<Watermark>>;

    /// The stored value, or `floor` if the table was never committed.
    async fn get_or(&self, key: &WatermarkKey, floor: &CursorValue) -> Result<CursorValue> {
        Ok(self
            .get(key)
            .await?
            .map(|watermark| watermark.value)
            .unwrap_or_else(|| floor.clone()))
    }
}

/// Opens the backend selected by `[state]`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn WatermarkStore>> {
    match &config.state {
        StateConfig::File { path } => Ok(Arc::new(FileWatermarkStore::new(path))),
        StateConfig::Postgres { url, table } => {
            let pg_config = match url {
                Some(url) => url.parse::<tokio_postgres::Config>().map_err(|e| {
                    crate::Error::Config(format!("invalid state.url: {}", e))
                })?,
                None => config.postgres_config()?,
            };
            let store = PostgresWatermarkStore::connect(&pg_config, table).await?;
            Ok(Arc::new(store))
        }
        StateConfig::Memory => {
            tracing::warn!("Using in-memory watermark store; progress will not survive this process");
            Ok(Arc::new(MemoryWatermarkStore::new()))
        }
    }
}
