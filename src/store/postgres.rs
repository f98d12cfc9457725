use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row as PgRow;
use tracing::{debug, info};

use super::WatermarkStore;
use crate::postgres::PgConnection;
use crate::types::{is_valid_identifier, CursorValue, Watermark, WatermarkKey};
use crate::{Error, Result};

/// Watermarks kept in a state table, one row per `(table_name, cursor_column)`.
///
/// Values are stored as text together with their type so the table stays
/// readable from any SQL client.
pub struct PostgresWatermarkStore {
    connection: PgConnection,
    table: String,
}

impl PostgresWatermarkStore {
    pub async fn connect(config: &tokio_postgres::Config, table: &str) -> Result<Self> {
        if !is_valid_identifier(table) {
            return Err(Error::Config(format!("invalid state table name: {:?}", table)));
        }

        let connection = PgConnection::connect(config, "state")
            .await
            .map_err(|e| Error::store(format!("cannot connect to state database: {}", e)))?;

        let store = Self {
            connection,
            table: table
                .split('.')
                .map(|part| format!("\"{}\"", part))
                .collect::<Vec<_>>()
                .join("."),
        };
        store.ensure_schema().await?;

        info!(table = %store.table, "Opened PostgreSQL watermark store");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        debug!("Ensuring watermark state table exists");

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT NOT NULL,
                cursor_column TEXT NOT NULL,
                value_type TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (table_name, cursor_column)
            )
            "#,
            self.table
        );

        self.connection
            .client()
            .batch_execute(&ddl)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl WatermarkStore for PostgresWatermarkStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Option<Watermark>> {
        let query = format!(
            "SELECT table_name, cursor_column, value_type, value, updated_at
             FROM {} WHERE table_name = $1 AND cursor_column = $2",
            self.table
        );

        let row = self
            .connection
            .client()
            .query_opt(&query, &[&key.table, &key.cursor_column])
            .await
            .map_err(store_error)?;

        row.map(|r| decode_watermark(&r)).transpose()
    }

    async fn set(&self, key: &WatermarkKey, value: &CursorValue) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (table_name, cursor_column, value_type, value, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (table_name, cursor_column) DO UPDATE SET
                value_type = EXCLUDED.value_type,
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at",
            self.table
        );

        let (value_type, text) = encode_value(value);
        self.connection
            .client()
            .execute(&query, &[&key.table, &key.cursor_column, &value_type, &text])
            .await
            .map_err(store_error)?;

        debug!(watermark_key = %key, watermark = %value, "Watermark saved");
        Ok(())
    }

    async fn delete(&self, key: &WatermarkKey) -> Result<bool> {
        let query = format!(
            "DELETE FROM {} WHERE table_name = $1 AND cursor_column = $2",
            self.table
        );

        let deleted = self
            .connection
            .client()
            .execute(&query, &[&key.table, &key.cursor_column])
            .await
            .map_err(store_error)?;

        Ok(deleted > 0)
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let query = format!(
            "SELECT table_name, cursor_column, value_type, value, updated_at
             FROM {} ORDER BY table_name, cursor_column",
            self.table
        );

        let rows = self
            .connection
            .client()
            .query(&query, &[])
            .await
            .map_err(store_error)?;

        rows.iter().map(decode_watermark).collect()
    }
}

fn store_error(e: tokio_postgres::Error) -> Error {
    Error::store(format!("state database error: {}", e))
}

fn encode_value(value: &CursorValue) -> (&'static str, String) {
    let value_type = match value {
        CursorValue::Integer(_) => "integer",
        CursorValue::Timestamp(_) => "timestamp",
        CursorValue::Text(_) => "text",
    };
    (value_type, value.to_string())
}

fn decode_value(value_type: &str, text: &str) -> Result<CursorValue> {
    let invalid = || Error::store(format!("invalid stored {} watermark: {:?}", value_type, text));

    match value_type {
        "integer" => text.parse().map(CursorValue::Integer).map_err(|_| invalid()),
        "timestamp" => DateTime::parse_from_rfc3339(text)
            .map(|ts| CursorValue::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|_| invalid()),
        "text" => Ok(CursorValue::Text(text.to_string())),
        _ => Err(invalid()),
    }
}

fn decode_watermark(row: &PgRow) -> Result<Watermark> {
    let get_err = |e: tokio_postgres::Error| Error::store(format!("malformed state row: {}", e));

    let value_type: String = row.try_get("value_type").map_err(get_err)?;
    let value: String = row.try_get("value").map_err(get_err)?;

    Ok(Watermark {
        table: row.try_get("table_name").map_err(get_err)?,
        cursor_column: row.try_get("cursor_column").map_err(get_err)?,
        value: decode_value(&value_type, &value)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}
