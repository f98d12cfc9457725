use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::SyncSettings;
use crate::types::{is_valid_identifier, CursorValue, TableSpec};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub state: StateConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Source database connection.
///
/// `url` wins over the discrete fields when both are present.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub ssl_mode: SslMode,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StateConfig {
    File {
        #[serde(default = "default_state_path")]
        path: PathBuf,
    },
    Postgres {
        /// Defaults to the source database when absent.
        #[serde(default)]
        url: Option<String>,
        #[serde(default = "default_state_table")]
        table: String,
    },
    /// Non-persistent; watermarks are lost when the process exits.
    Memory,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig::File {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    Jsonl(JsonlSinkConfig),
    Kafka(KafkaConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonlSinkConfig {
    #[serde(default = "default_sink_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_dataset")]
    pub dataset: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic_prefix: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_floor")]
    pub default_floor: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub table_timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_floor: default_floor(),
            concurrency: default_concurrency(),
            table_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    pub name: String,
    pub cursor_column: String,
    #[serde(default)]
    pub initial_value: Option<String>,
    #[serde(default)]
    pub key_columns: Vec<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PG_WATERMARK_SYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> std::result::Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(Error::Config("no tables configured".to_string()));
        }
        if self.sync.concurrency == 0 {
            return Err(Error::Config("sync.concurrency must be at least 1".to_string()));
        }
        if self.sync.default_floor.trim().is_empty() {
            return Err(Error::Config("sync.default_floor must not be empty".to_string()));
        }
        if self.source.ssl_mode == SslMode::Require {
            return Err(Error::Config(
                "source.ssl_mode = \"require\" is not supported; TLS is not built in".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut destinations: HashMap<&str, &str> = HashMap::new();
        for table in &self.tables {
            if !is_valid_identifier(&table.name) {
                return Err(Error::Config(format!("invalid table name: {:?}", table.name)));
            }
            if !is_valid_identifier(&table.cursor_column) || table.cursor_column.contains('.') {
                return Err(Error::Config(format!(
                    "invalid cursor column for table {}: {:?}",
                    table.name, table.cursor_column
                )));
            }
            if !seen.insert((table.name.as_str(), table.cursor_column.as_str())) {
                return Err(Error::Config(format!(
                    "table {} with cursor column {} is configured twice",
                    table.name, table.cursor_column
                )));
            }

            let destination = table.name.rsplit('.').next().unwrap_or(&table.name);
            match destinations.insert(destination, &table.name) {
                Some(other) if other != table.name => {
                    return Err(Error::Config(format!(
                        "tables {} and {} would both load into destination {}",
                        other, table.name, destination
                    )));
                }
                _ => {}
            }
        }

        if let SinkConfig::Kafka(kafka) = &self.sink {
            if kafka.brokers.is_empty() {
                return Err(Error::Config("sink.brokers must not be empty".to_string()));
            }
        }

        Ok(())
    }

    pub fn default_floor(&self) -> CursorValue {
        CursorValue::parse(&self.sync.default_floor)
    }

    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.tables
            .iter()
            .map(|table| {
                let spec = TableSpec::new(&table.name, &table.cursor_column)
                    .with_key_columns(table.key_columns.clone());
                match &table.initial_value {
                    Some(value) => spec.with_initial_value(CursorValue::parse(value)),
                    None => spec,
                }
            })
            .collect()
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            default_floor: self.default_floor(),
            concurrency: self.sync.concurrency,
            table_timeout: self.sync.table_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn postgres_config(&self) -> Result<tokio_postgres::Config> {
        let mut pg = match &self.source.url {
            Some(url) => url
                .parse::<tokio_postgres::Config>()
                .map_err(|e| Error::Config(format!("invalid source.url: {}", e)))?,
            None => {
                let mut pg = tokio_postgres::Config::new();
                pg.host(&self.source.host)
                    .port(self.source.port)
                    .dbname(&self.source.database)
                    .user(&self.source.username)
                    .password(&self.source.password);
                pg
            }
        };

        pg.connect_timeout(Duration::from_secs(self.source.connect_timeout_secs));
        pg.ssl_mode(match self.source.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require => tokio_postgres::config::SslMode::Require,
        });
        pg.application_name("pg-watermark-sync");
        Ok(pg)
    }

    pub fn kafka_topic_name(kafka: &KafkaConfig, table_name: &str) -> String {
        format!("{}.{}", kafka.topic_prefix, table_name)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state/watermarks.json")
}

fn default_state_table() -> String {
    "_watermark_sync_state".to_string()
}

fn default_sink_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_dataset() -> String {
    "raw_intern_tracker".to_string()
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    100
}

fn default_batch_size() -> usize {
    16384
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_floor() -> String {
    "1970-01-01T00:00:00Z".to_string()
}

fn default_concurrency() -> usize {
    4
}
