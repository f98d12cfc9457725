use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use super::serializer::{JsonSerializer, LoadMetadata};
use super::SinkWriter;
use crate::types::{Row, TableSpec};
use crate::{Error, Result};

/// Writes newline-delimited JSON load files, the bulk-load format warehouses
/// ingest directly.
///
/// Layout: `<directory>/<dataset>/<table>/<load_id>.<source>.jsonl`, where
/// `<source>` is the source table (schema included when configured) and its
/// cursor column, so tables sharing a destination never share a file. A file
/// only appears once it is complete and synced; failed loads leave nothing
/// behind.
pub struct JsonLinesSink {
    directory: PathBuf,
    dataset: String,
}

impl JsonLinesSink {
    pub fn new(directory: impl AsRef<Path>, dataset: &str) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            dataset: dataset.to_string(),
        }
    }

    pub fn table_dir(&self, table: &TableSpec) -> PathBuf {
        self.directory
            .join(&self.dataset)
            .join(table.destination_name())
    }

    pub fn load_file_name(table: &TableSpec, load_id: &str) -> String {
        format!("{}.{}.{}.jsonl", load_id, table.name, table.cursor_column)
    }

    async fn write_rows(
        &self,
        table: &TableSpec,
        file: fs::File,
        meta: &LoadMetadata,
        mut rows: BoxStream<'_, Result<Row>>,
    ) -> Result<u64> {
        let io_err = |e: std::io::Error| Error::sink_write(&table.name, e);

        let mut writer = BufWriter::new(file);
        let mut count = 0u64;

        while let Some(row) = rows.try_next().await? {
            let mut line = JsonSerializer::serialize(&row, meta)
                .map_err(|e| Error::sink_write(&table.name, e))?;
            line.push('\n');
            writer.write_all(line.as_bytes()).await.map_err(io_err)?;
            count += 1;
        }

        writer.flush().await.map_err(io_err)?;
        writer.get_ref().sync_all().await.map_err(io_err)?;
        Ok(count)
    }
}

#[async_trait]
impl SinkWriter for JsonLinesSink {
    async fn write(
        &self,
        table: &TableSpec,
        load_id: &str,
        rows: BoxStream<'_, Result<Row>>,
    ) -> Result<u64> {
        let dir = self.table_dir(table);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::sink_write(&table.name, e))?;

        let final_path = dir.join(Self::load_file_name(table, load_id));
        let temp_path = final_path.with_extension("jsonl.tmp");
        let meta = LoadMetadata::new(load_id);

        // Never truncate a file another writer owns.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| Error::sink_write(&table.name, format!("{}: {}", temp_path.display(), e)))?;

        let count = match self.write_rows(table, file, &meta, rows).await {
            Ok(count) => count,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&temp_path).await {
                    warn!(path = %temp_path.display(), "Failed to remove partial load file: {}", cleanup);
                }
                return Err(e);
            }
        };

        if count == 0 {
            debug!(table = %table.name, "No rows; no load file written");
            fs::remove_file(&temp_path)
                .await
                .map_err(|e| Error::sink_write(&table.name, e))?;
            return Ok(0);
        }

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| Error::sink_write(&table.name, e))?;

        info!(table = %table.name, rows = count, path = %final_path.display(), "Load file written");
        Ok(count)
    }
}
