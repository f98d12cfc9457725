use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

use crate::source::{RowStream, SourceReader};
use crate::tracker::CursorTracker;
use crate::types::{Row, TableSpec};
use crate::Result;

/// Runs the bounded, ordered read for one table.
pub struct TableExtractor {
    source: Arc<dyn SourceReader>,
}

impl TableExtractor {
    pub fn new(source: Arc<dyn SourceReader>) -> Self {
        Self { source }
    }

    /// Opens the rows of `table` beyond the tracker's lower bound.
    ///
    /// The returned stream reports each row to `tracker` at the moment it is
    /// handed to the consumer, and marks extraction complete once the source
    /// is exhausted. It ends at the first error and cannot be restarted.
    pub async fn extract<'t>(
        &self,
        table: &TableSpec,
        tracker: &'t mut CursorTracker,
    ) -> Result<TrackedRows<'t>> {
        debug!(
            table = %table.name,
            cursor_column = %table.cursor_column,
            lower_bound = %tracker.lower_bound(),
            "Starting extraction"
        );

        let rows = self.source.read_after(table, tracker.lower_bound()).await?;

        Ok(TrackedRows {
            rows,
            tracker,
            finished: false,
        })
    }
}

/// Row stream that keeps a [`CursorTracker`] in lockstep with delivery.
pub struct TrackedRows<'t> {
    rows: RowStream,
    tracker: &'t mut CursorTracker,
    finished: bool,
}

impl Stream for TrackedRows<'_> {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.rows.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(row))) => {
                this.tracker.observe(row.cursor());
                Poll::Ready(Some(Ok(row)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                this.tracker.mark_extraction_complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
