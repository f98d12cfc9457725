pub mod jsonl;
pub mod serializer;

pub use jsonl::JsonLinesSink;
pub use serializer::{JsonSerializer, LoadMetadata};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::config::{Config, SinkConfig};
use crate::kafka::KafkaSink;
use crate::types::{Row, TableSpec};
use crate::Result;

/// Destination for one table's row sequence.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Consumes `rows` to the end and returns how many were written.
    ///
    /// `Ok` means every row is durably stored. An error from the stream
    /// itself is returned unchanged; the sink's own failures are
    /// [`Error::SinkWrite`](crate::Error::SinkWrite).
    async fn write(
        &self,
        table: &TableSpec,
        load_id: &str,
        rows: BoxStream<'_, Result<Row>>,
    ) -> Result<u64>;
}

/// Builds the sink selected by `[sink]`.
pub fn open_sink(config: &Config) -> Result<Arc<dyn SinkWriter>> {
    match &config.sink {
        SinkConfig::Jsonl(jsonl) => Ok(Arc::new(JsonLinesSink::new(&jsonl.directory, &jsonl.dataset))),
        SinkConfig::Kafka(kafka) => Ok(Arc::new(KafkaSink::new(kafka)?)),
    }
}
