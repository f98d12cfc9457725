use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, info};

use super::KeyStrategy;
use crate::config::{Config, KafkaConfig};
use crate::sink::{JsonSerializer, LoadMetadata, SinkWriter};
use crate::types::{Row, TableSpec};
use crate::{Error, Result};

/// Publishes each row as one JSON message to `<topic_prefix>.<table>`.
///
/// Every send waits for its delivery report, so a successful write means the
/// brokers acknowledged all rows under the configured `acks`.
pub struct KafkaSink {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("batch.size", config.batch_size.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| Error::Config(format!("cannot create Kafka producer: {}", e)))?;

        Ok(Self {
            producer,
            config: config.clone(),
        })
    }

    pub fn topic_for(&self, table: &TableSpec) -> String {
        Config::kafka_topic_name(&self.config, table.destination_name())
    }
}

#[async_trait]
impl SinkWriter for KafkaSink {
    async fn write(
        &self,
        table: &TableSpec,
        load_id: &str,
        mut rows: BoxStream<'_, Result<Row>>,
    ) -> Result<u64> {
        let topic = self.topic_for(table);
        let key_strategy = KeyStrategy::for_table(table);
        let meta = LoadMetadata::new(load_id);
        let mut count = 0u64;

        debug!(table = %table.name, topic = %topic, "Publishing rows");

        while let Some(row) = rows.try_next().await? {
            let payload = JsonSerializer::serialize(&row, &meta)
                .map_err(|e| Error::sink_write(&table.name, e))?;
            let key = key_strategy.extract_key(&row);

            let mut record = FutureRecord::<str, str>::to(&topic).payload(&payload);
            if let Some(key) = key.as_deref() {
                record = record.key(key);
            }

            self.producer
                .send(record, Timeout::Never)
                .await
                .map_err(|(e, _)| Error::sink_write(&table.name, e))?;
            count += 1;
        }

        info!(table = %table.name, topic = %topic, rows = count, "Rows delivered to Kafka");
        Ok(count)
    }
}
