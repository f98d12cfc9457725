use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row as PgRow;
use tracing::debug;

use super::PgConnection;
use crate::source::{RowStream, SourceReader};
use crate::types::{CursorKind, CursorValue, Row, TableSpec};
use crate::{Error, Result};

/// Reads incremental slices of tables with one connection per read.
///
/// Each row is rendered by the server with `row_to_json`, so every column
/// type passes through with its column order intact, and the cursor column
/// is read separately as a typed value.
pub struct PostgresSource {
    config: tokio_postgres::Config,
}

impl PostgresSource {
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceReader for PostgresSource {
    async fn read_after(&self, table: &TableSpec, lower_bound: &CursorValue) -> Result<RowStream> {
        let kind = lower_bound.kind();
        let query = incremental_query(table, kind);

        let connection = PgConnection::connect(&self.config, &table.name)
            .await
            .map_err(|e| Error::source_read(&table.name, e))?;

        debug!(table = %table.name, lower_bound = %lower_bound, "Opening incremental read");

        let bound = lower_bound.to_sql_text();
        let params: [&(dyn ToSql + Sync); 1] = [&bound];
        let rows = connection
            .client()
            .query_raw(query.as_str(), params.iter().map(|p| *p as &dyn ToSql))
            .await
            .map_err(|e| Error::source_read(&table.name, e))?;

        Ok(Box::pin(PgRowStream {
            rows: Box::pin(rows),
            kind,
            table: table.name.clone(),
            _connection: connection,
        }))
    }
}

/// Builds the pushed-down read for one table.
///
/// The bound is sent as text and cast server-side, which lets one query shape
/// serve `timestamp`, `timestamptz`, `date`, and any integer cursor column.
/// Text cursors compare under the `"C"` collation, the byte order
/// [`CursorValue`] uses to pick the high-water mark.
pub(crate) fn incremental_query(table: &TableSpec, kind: CursorKind) -> String {
    let cursor = table.quoted_cursor_column();
    let sql_type = kind.sql_type();
    let collate = match kind {
        CursorKind::Text => " COLLATE \"C\"",
        CursorKind::Integer | CursorKind::Timestamp => "",
    };

    format!(
        "SELECT row_to_json(t)::text AS row_json, t.{cursor}::{sql_type} AS cursor_value \
         FROM {table} AS t \
         WHERE t.{cursor}{collate} > $1::text::{sql_type}{collate} \
         ORDER BY t.{cursor}{collate} ASC",
        cursor = cursor,
        sql_type = sql_type,
        collate = collate,
        table = table.quoted_name(),
    )
}

struct PgRowStream {
    rows: Pin<Box<tokio_postgres::RowStream>>,
    kind: CursorKind,
    table: String,
    // Owns the session; dropped together with the row stream.
    _connection: PgConnection,
}

impl Stream for PgRowStream {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match this.rows.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(
                decode_row(&row, this.kind).map_err(|e| Error::source_read(&this.table, e)),
            )),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(Error::source_read(&this.table, e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn decode_row(row: &PgRow, kind: CursorKind) -> std::result::Result<Row, String> {
    let json: String = row.try_get(0).map_err(|e| e.to_string())?;
    let fields = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&json)
        .map_err(|e| format!("row is not a JSON object: {}", e))?;

    let cursor = match kind {
        CursorKind::Integer => row.try_get::<_, i64>(1).map(CursorValue::Integer),
        CursorKind::Timestamp => row
            .try_get::<_, DateTime<Utc>>(1)
            .map(CursorValue::Timestamp),
        CursorKind::Text => row.try_get::<_, String>(1).map(CursorValue::Text),
    }
    .map_err(|e| format!("cannot read cursor value: {}", e))?;

    Ok(Row::new(cursor, fields))
}
