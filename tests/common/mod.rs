#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use pg_watermark_sync::store::MemoryWatermarkStore;
use pg_watermark_sync::{
    CursorValue, Error, Result, Row, RowStream, SinkWriter, SourceReader, TableSpec, Watermark,
    WatermarkKey, WatermarkStore,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Get test database configuration from environment variables
pub fn get_test_pg_config() -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()))
        .port(
            env::var("TEST_PG_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .unwrap_or(5432),
        )
        .dbname(&env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()))
        .user(&env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()))
        .password(env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string()));
    config
}

pub fn ts(value: &str) -> CursorValue {
    CursorValue::parse(value)
}

/// A row of an `applications`-like table with `id` and one cursor column.
pub fn row(id: i64, cursor_column: &str, cursor: &str) -> Row {
    let mut fields = Map::new();
    fields.insert("id".to_string(), json!(id));
    fields.insert(cursor_column.to_string(), Value::String(cursor.to_string()));
    Row::new(ts(cursor), fields)
}

#[derive(Debug, Clone, Copy)]
pub enum SourceFault {
    /// `read_after` itself fails.
    OnOpen,
    /// The stream yields this many rows, then an error.
    AfterRows(usize),
    /// The stream yields this many rows, then never makes progress.
    StallAfter(usize),
}

/// In-memory source that filters and orders like the real one.
#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    faults: Mutex<HashMap<String, SourceFault>>,
    reads: AtomicUsize,
    bounds: Mutex<Vec<CursorValue>>,
    read_delay: Mutex<Option<Duration>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row: Row) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn fail(&self, table: &str, fault: SourceFault) {
        self.faults.lock().unwrap().insert(table.to_string(), fault);
    }

    pub fn heal(&self, table: &str) {
        self.faults.lock().unwrap().remove(table);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Lower bounds passed to `read_after`, in call order.
    pub fn bounds(&self) -> Vec<CursorValue> {
        self.bounds.lock().unwrap().clone()
    }

    /// Delay every `read_after` before it returns its stream.
    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn read_after(&self, table: &TableSpec, lower_bound: &CursorValue) -> Result<RowStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.bounds.lock().unwrap().push(lower_bound.clone());

        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = self.faults.lock().unwrap().get(&table.name).copied();

        if let Some(SourceFault::OnOpen) = fault {
            return Err(Error::SourceRead {
                table: table.name.clone(),
                message: "connection refused".to_string(),
            });
        }

        let mut rows: Vec<Row> = self
            .tables
            .lock()
            .unwrap()
            .get(&table.name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.cursor() > lower_bound)
            .collect();
        rows.sort_by(|a, b| a.cursor().cmp(b.cursor()));

        let name = table.name.clone();
        let stream = match fault {
            Some(SourceFault::AfterRows(n)) => {
                rows.truncate(n);
                let broken = Err(Error::SourceRead {
                    table: name,
                    message: "connection reset by peer".to_string(),
                });
                stream::iter(rows.into_iter().map(Ok).chain(std::iter::once(broken))).boxed()
            }
            Some(SourceFault::StallAfter(n)) => {
                rows.truncate(n);
                stream::iter(rows.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()
            }
            _ => stream::iter(rows.into_iter().map(Ok)).boxed(),
        };
        Ok(stream)
    }
}

/// In-memory sink; rows of a failed write are discarded.
#[derive(Default)]
pub struct MemorySink {
    written: Mutex<HashMap<String, Vec<Row>>>,
    fail_after: Mutex<HashMap<String, usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `rows` rows of `table`, then fail on the next one.
    pub fn fail_after(&self, table: &str, rows: usize) {
        self.fail_after.lock().unwrap().insert(table.to_string(), rows);
    }

    pub fn heal(&self, table: &str) {
        self.fail_after.lock().unwrap().remove(table);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.written
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ids(&self, table: &str) -> Vec<i64> {
        self.rows(table)
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }
}

#[async_trait]
impl SinkWriter for MemorySink {
    async fn write(
        &self,
        table: &TableSpec,
        _load_id: &str,
        mut rows: BoxStream<'_, Result<Row>>,
    ) -> Result<u64> {
        let limit = self.fail_after.lock().unwrap().get(&table.name).copied();
        let mut batch = Vec::new();

        while let Some(row) = rows.next().await {
            let row = row?;
            if limit == Some(batch.len()) {
                return Err(Error::SinkWrite {
                    table: table.name.clone(),
                    message: "destination rejected batch".to_string(),
                });
            }
            batch.push(row);
        }

        let count = batch.len() as u64;
        self.written
            .lock()
            .unwrap()
            .entry(table.name.clone())
            .or_default()
            .extend(batch);
        Ok(count)
    }
}

/// Memory store whose reads or writes can be switched off.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryWatermarkStore,
    reads_down: AtomicBool,
    writes_down: AtomicBool,
    sets: AtomicUsize,
    ack_delay: Mutex<Option<Duration>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    /// Make `set` land in the store, then wait `delay` before returning.
    pub fn slow_acks(&self, delay: Duration) {
        *self.ack_delay.lock().unwrap() = Some(delay);
    }

    /// Successful `set` calls so far.
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn unavailable() -> Error {
        Error::StoreUnavailable {
            message: "state database is down".to_string(),
        }
    }
}

#[async_trait]
impl WatermarkStore for FlakyStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Option<Watermark>> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &WatermarkKey, value: &CursorValue) -> Result<()> {
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.set(key, value).await?;
        self.sets.fetch_add(1, Ordering::SeqCst);

        let delay = *self.ack_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &WatermarkKey) -> Result<bool> {
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete(key).await
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.list().await
    }
}
