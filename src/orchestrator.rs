//! Runs one incremental sync over all configured tables.
//!
//! Each table moves through `Idle → Extracting → AwaitingSinkAck →
//! Committed`, or ends in `Failed` from any earlier state with its watermark
//! untouched. Tables never share a transaction: one table failing does not
//! stop or roll back another.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::extractor::TableExtractor;
use crate::sink::SinkWriter;
use crate::source::SourceReader;
use crate::store::WatermarkStore;
use crate::tracker::CursorTracker;
use crate::types::{CursorValue, TableSpec};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub default_floor: CursorValue,
    /// Maximum number of tables in flight; each holds one source connection.
    pub concurrency: usize,
    /// Deadline for one table's whole pipeline.
    pub table_timeout: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_floor: CursorValue::epoch(),
            concurrency: 4,
            table_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Idle,
    Extracting,
    AwaitingSinkAck,
    Committed,
    Failed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableState::Idle => "idle",
            TableState::Extracting => "extracting",
            TableState::AwaitingSinkAck => "awaiting_sink_ack",
            TableState::Committed => "committed",
            TableState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Committed,
    Failed {
        /// State the table was in when it failed.
        during: TableState,
        kind: &'static str,
        message: String,
    },
}

/// Outcome of one table in one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub table: String,
    pub cursor_column: String,
    /// Rows handed to the sink.
    pub rows_processed: u64,
    /// Watermark read at the start of the run; `None` if it could not be read.
    pub previous_watermark: Option<CursorValue>,
    /// Watermark in force after the run.
    pub new_watermark: Option<CursorValue>,
    pub status: TableStatus,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn is_committed(&self) -> bool {
        self.status == TableStatus::Committed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    /// Some tables committed and some failed; the committed ones stand.
    PartiallyFailed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub load_id: String,
    pub status: RunStatus,
    pub results: Vec<RunResult>,
}

impl RunReport {
    pub fn committed(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| r.is_committed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| !r.is_committed())
    }

    pub fn total_rows(&self) -> u64 {
        self.results.iter().map(|r| r.rows_processed).sum()
    }

    /// `Cancelled` only when shutdown actually interrupted a table.
    fn status_of(results: &[RunResult]) -> RunStatus {
        let failed = results.iter().filter(|r| !r.is_committed()).count();
        let interrupted = results.iter().any(|r| {
            matches!(&r.status, TableStatus::Failed { kind, .. } if *kind == Error::Shutdown.kind())
        });
        if interrupted {
            RunStatus::Cancelled
        } else if failed == 0 {
            RunStatus::Succeeded
        } else if failed < results.len() {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Failed
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Load {}: {:?}, {} rows, {} committed, {} failed",
            self.load_id,
            self.status,
            self.total_rows(),
            self.committed().count(),
            self.failed().count()
        )?;

        for result in &self.results {
            let watermark = result
                .new_watermark
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            match &result.status {
                TableStatus::Committed => writeln!(
                    f,
                    "  {:<32} committed  rows={:<8} watermark={}",
                    result.table, result.rows_processed, watermark
                )?,
                TableStatus::Failed { during, kind, message } => writeln!(
                    f,
                    "  {:<32} failed     rows={:<8} watermark={} during={} error={}: {}",
                    result.table, result.rows_processed, watermark, during, kind, message
                )?,
            }
        }
        Ok(())
    }
}

/// Progress of one table, kept outside the pipeline future so it survives
/// cancellation and timeouts.
struct TableProgress {
    state: TableState,
    previous: Option<CursorValue>,
    rows: u64,
}

impl TableProgress {
    fn enter(&mut self, table: &TableSpec, state: TableState) {
        debug!(table = %table.name, from = %self.state, to = %state, "Table state change");
        self.state = state;
    }
}

pub struct SyncOrchestrator {
    extractor: TableExtractor,
    sink: Arc<dyn SinkWriter>,
    store: Arc<dyn WatermarkStore>,
    tables: Vec<TableSpec>,
    settings: SyncSettings,
    run_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        sink: Arc<dyn SinkWriter>,
        store: Arc<dyn WatermarkStore>,
        tables: Vec<TableSpec>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            extractor: TableExtractor::new(source),
            sink,
            store,
            tables,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Syncs every table once.
    ///
    /// Runs on the same orchestrator are serialised, so no two readers of a
    /// table's watermark ever race to commit.
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        let _guard = self.run_lock.lock().await;

        let load_id = new_load_id();
        let concurrency = self.settings.concurrency.max(1);
        info!(
            load_id = %load_id,
            tables = self.tables.len(),
            concurrency,
            "Starting sync run"
        );

        let load_id_ref = &load_id;
        let cancel_ref = &cancel;
        let mut indexed: Vec<(usize, RunResult)> = stream::iter(self.tables.iter().enumerate())
            .map(|(i, table)| async move { (i, self.sync_table(table, load_id_ref, cancel_ref).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let results: Vec<RunResult> = indexed.into_iter().map(|(_, r)| r).collect();
        let status = RunReport::status_of(&results);
        let report = RunReport {
            load_id,
            status,
            results,
        };

        match report.status {
            RunStatus::Succeeded => info!(
                load_id = %report.load_id,
                rows = report.total_rows(),
                "Sync run succeeded"
            ),
            RunStatus::PartiallyFailed => warn!(
                load_id = %report.load_id,
                committed = report.committed().count(),
                failed = report.failed().count(),
                "Sync run partially failed; committed tables keep their progress"
            ),
            RunStatus::Failed => error!(load_id = %report.load_id, "Sync run failed for every table"),
            RunStatus::Cancelled => warn!(load_id = %report.load_id, "Sync run cancelled"),
        }

        report
    }

    #[instrument(skip_all, fields(table = %table.name))]
    async fn sync_table(&self, table: &TableSpec, load_id: &str, cancel: &CancellationToken) -> RunResult {
        let started = Instant::now();
        let mut progress = TableProgress {
            state: TableState::Idle,
            previous: None,
            rows: 0,
        };

        let delivered = if cancel.is_cancelled() {
            Err(Error::Shutdown)
        } else {
            let delivery = self.deliver(table, load_id, &mut progress);
            let bounded = async {
                match self.settings.table_timeout {
                    Some(deadline) => tokio::time::timeout(deadline, delivery)
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::Timeout {
                                message: format!("table {} exceeded {:?}", table.name, deadline),
                            })
                        }),
                    None => delivery.await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Shutdown),
                delivered = bounded => delivered,
            }
        };

        // Once the sink has acknowledged, the commit runs to completion so the
        // result always reports what the store holds.
        let outcome = match delivered {
            Ok(mut tracker) => tracker.commit().await,
            Err(e) => Err(e),
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(committed) => {
                progress.enter(table, TableState::Committed);
                let new_watermark = committed.or_else(|| progress.previous.clone());
                info!(
                    rows = progress.rows,
                    watermark = ?new_watermark.as_ref().map(ToString::to_string),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Table committed"
                );
                RunResult {
                    table: table.name.clone(),
                    cursor_column: table.cursor_column.clone(),
                    rows_processed: progress.rows,
                    previous_watermark: progress.previous.clone(),
                    new_watermark,
                    status: TableStatus::Committed,
                    elapsed,
                }
            }
            Err(e) => {
                let during = progress.state;
                progress.enter(table, TableState::Failed);
                if matches!(e, Error::PrematureCommit { .. }) {
                    error!(error = %e, "Commit attempted before extraction completed; this is an orchestration bug");
                } else {
                    warn!(error = %e, during = %during, rows = progress.rows, "Table failed; watermark unchanged");
                }
                RunResult {
                    table: table.name.clone(),
                    cursor_column: table.cursor_column.clone(),
                    rows_processed: progress.rows,
                    previous_watermark: progress.previous.clone(),
                    new_watermark: progress.previous.clone(),
                    status: TableStatus::Failed {
                        during,
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                    elapsed,
                }
            }
        }
    }

    /// Reads the table past its watermark and hands the rows to the sink.
    ///
    /// Returns the tracker once the sink has acknowledged every row; the
    /// caller commits it.
    async fn deliver(
        &self,
        table: &TableSpec,
        load_id: &str,
        progress: &mut TableProgress,
    ) -> Result<CursorTracker> {
        let mut tracker =
            CursorTracker::open(self.store.clone(), table, &self.settings.default_floor).await?;
        progress.previous = Some(tracker.lower_bound().clone());

        progress.enter(table, TableState::Extracting);
        let rows = self.extractor.extract(table, &mut tracker).await?;
        let written = self.sink.write(table, load_id, Box::pin(rows)).await;

        progress.rows = tracker.rows_observed();
        if tracker.extraction_complete() {
            progress.enter(table, TableState::AwaitingSinkAck);
        }
        let written = written?;

        if written != tracker.rows_observed() {
            warn!(
                written,
                observed = tracker.rows_observed(),
                "Sink reported a different row count than was extracted"
            );
        }

        Ok(tracker)
    }
}

/// Restricts `tables` to the given names, keeping configured order.
pub fn select_tables(tables: &[TableSpec], names: &[String]) -> Result<Vec<TableSpec>> {
    if names.is_empty() {
        return Ok(tables.to_vec());
    }

    if let Some(unknown) = names.iter().find(|n| !tables.iter().any(|t| &t.name == *n)) {
        return Err(Error::Config(format!("table {} is not configured", unknown)));
    }

    Ok(tables
        .iter()
        .filter(|t| names.contains(&t.name))
        .cloned()
        .collect())
}

fn new_load_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string()
}
