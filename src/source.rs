use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{CursorValue, Row, TableSpec};
use crate::Result;

/// A live, lazily-consumed sequence of rows.
///
/// Dropping the stream releases whatever the source holds open for it.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Reads the rows of a table beyond a watermark.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Rows with `cursor_column > lower_bound`, ordered by `cursor_column`
    /// ascending. Filtering and ordering happen in the source.
    ///
    /// Failures, whether opening the stream or while it is consumed, are
    /// reported as [`Error::SourceRead`](crate::Error::SourceRead).
    async fn read_after(&self, table: &TableSpec, lower_bound: &CursorValue) -> Result<RowStream>;
}
