//! Per-table, per-run cursor tracking.
//!
//! A [`CursorTracker`] reads the committed watermark once, exposes it as the
//! exclusive lower bound of the run, and folds every delivered row's cursor
//! into an in-memory high-water mark. Nothing reaches the store until
//! [`CursorTracker::commit`], which the orchestrator calls only after the sink
//! acknowledged the whole row sequence.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::WatermarkStore;
use crate::types::{CursorValue, TableSpec, WatermarkKey};
use crate::{Error, Result};

pub struct CursorTracker {
    store: Arc<dyn WatermarkStore>,
    key: WatermarkKey,
    lower_bound: CursorValue,
    high_water: Option<CursorValue>,
    rows_observed: u64,
    rows_at_or_below_bound: u64,
    extraction_complete: bool,
    committed: Option<CursorValue>,
}

impl CursorTracker {
    /// Reads the current watermark for `table`, falling back to its floor.
    ///
    /// Fails with [`Error::StoreUnavailable`] if the store cannot be read;
    /// there is no fallback to a guessed bound.
    pub async fn open(
        store: Arc<dyn WatermarkStore>,
        table: &TableSpec,
        default_floor: &CursorValue,
    ) -> Result<Self> {
        let key = table.key();
        let floor = table.floor(default_floor);
        let lower_bound = store.get_or(&key, &floor).await?;

        if lower_bound.kind() != floor.kind() {
            warn!(
                table = %table.name,
                watermark = %lower_bound,
                floor = %floor,
                "Stored watermark type differs from the configured floor; using the stored value"
            );
        }

        debug!(table = %table.name, lower_bound = %lower_bound, "Opened cursor tracker");
        Ok(Self::with_lower_bound(store, key, lower_bound))
    }

    /// Builds a tracker over an already known lower bound.
    pub fn with_lower_bound(
        store: Arc<dyn WatermarkStore>,
        key: WatermarkKey,
        lower_bound: CursorValue,
    ) -> Self {
        Self {
            store,
            key,
            lower_bound,
            high_water: None,
            rows_observed: 0,
            rows_at_or_below_bound: 0,
            extraction_complete: false,
            committed: None,
        }
    }

    pub fn key(&self) -> &WatermarkKey {
        &self.key
    }

    /// The watermark read at open; fixed for the whole run.
    pub fn lower_bound(&self) -> &CursorValue {
        &self.lower_bound
    }

    pub fn high_water(&self) -> Option<&CursorValue> {
        self.high_water.as_ref()
    }

    pub fn rows_observed(&self) -> u64 {
        self.rows_observed
    }

    pub fn extraction_complete(&self) -> bool {
        self.extraction_complete
    }

    /// Folds one delivered row's cursor value into the high-water mark.
    ///
    /// Arrival order is not trusted: the high-water mark is the maximum of
    /// everything observed, not the last value.
    pub fn observe(&mut self, value: &CursorValue) {
        self.rows_observed += 1;

        if value <= &self.lower_bound {
            self.rows_at_or_below_bound += 1;
        }

        match &self.high_water {
            Some(high) if high >= value => {}
            _ => self.high_water = Some(value.clone()),
        }
    }

    /// Records that the row sequence was read to the end.
    pub fn mark_extraction_complete(&mut self) {
        self.extraction_complete = true;

        if self.rows_at_or_below_bound > 0 {
            warn!(
                watermark_key = %self.key,
                rows = self.rows_at_or_below_bound,
                lower_bound = %self.lower_bound,
                "Source returned rows at or below the lower bound"
            );
        }
    }

    /// Persists the high-water mark.
    ///
    /// Returns the committed value, or `None` when no row was observed, in
    /// which case the store is not written at all. The committed value is
    /// never below the lower bound, so watermarks only move forward.
    pub async fn commit(&mut self) -> Result<Option<CursorValue>> {
        if !self.extraction_complete {
            return Err(Error::PrematureCommit {
                table: self.key.table.clone(),
            });
        }

        let Some(high) = &self.high_water else {
            debug!(watermark_key = %self.key, "No rows observed; watermark left unchanged");
            return Ok(None);
        };

        let value = std::cmp::max(high, &self.lower_bound).clone();
        if self.committed.as_ref() == Some(&value) {
            return Ok(Some(value));
        }

        self.store.set(&self.key, &value).await?;
        info!(
            watermark_key = %self.key,
            rows = self.rows_observed,
            watermark = %value,
            "Watermark committed"
        );

        self.committed = Some(value.clone());
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryWatermarkStore;

    fn tracker(store: &Arc<MemoryWatermarkStore>, lower_bound: i64) -> CursorTracker {
        CursorTracker::with_lower_bound(
            store.clone(),
            WatermarkKey::new("applications", "id"),
            CursorValue::Integer(lower_bound),
        )
    }

    #[tokio::test]
    async fn test_commit_takes_max_not_last() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let mut tracker = tracker(&store, 0);

        for value in [5, 3, 9, 3] {
            tracker.observe(&CursorValue::Integer(value));
        }
        tracker.mark_extraction_complete();

        assert_eq!(tracker.commit().await.unwrap(), Some(CursorValue::Integer(9)));
        assert_eq!(
            store.get(tracker.key()).await.unwrap().map(|w| w.value),
            Some(CursorValue::Integer(9))
        );
        assert_eq!(tracker.rows_observed(), 4);
    }

    #[tokio::test]
    async fn test_zero_rows_skips_write() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let key = WatermarkKey::new("applications", "id");
        store.set(&key, &CursorValue::Integer(40)).await.unwrap();

        let mut tracker = CursorTracker::open(
            store.clone(),
            &TableSpec::new("applications", "id"),
            &CursorValue::Integer(0),
        )
        .await
        .unwrap();
        assert_eq!(tracker.lower_bound(), &CursorValue::Integer(40));

        tracker.mark_extraction_complete();
        assert_eq!(tracker.commit().await.unwrap(), None);

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.value, CursorValue::Integer(40));
    }

    #[tokio::test]
    async fn test_zero_rows_on_first_run_writes_nothing() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let mut tracker = tracker(&store, 0);

        tracker.mark_extraction_complete();
        tracker.commit().await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_before_extraction_is_premature() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let mut tracker = tracker(&store, 0);
        tracker.observe(&CursorValue::Integer(3));

        assert!(matches!(
            tracker.commit().await,
            Err(Error::PrematureCommit { table }) if table == "applications"
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let mut tracker = tracker(&store, 50);

        // A misbehaving source hands back rows under the bound.
        tracker.observe(&CursorValue::Integer(12));
        tracker.observe(&CursorValue::Integer(7));
        tracker.mark_extraction_complete();

        assert_eq!(tracker.commit().await.unwrap(), Some(CursorValue::Integer(50)));
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let mut tracker = tracker(&store, 0);
        tracker.observe(&CursorValue::Integer(8));
        tracker.mark_extraction_complete();

        assert_eq!(tracker.commit().await.unwrap(), Some(CursorValue::Integer(8)));
        assert_eq!(tracker.commit().await.unwrap(), Some(CursorValue::Integer(8)));
    }

    #[tokio::test]
    async fn test_open_uses_table_floor() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let spec = TableSpec::new("application_contacts", "created_at")
            .with_initial_value(CursorValue::parse("2023-01-01"));

        let tracker = CursorTracker::open(store, &spec, &CursorValue::epoch())
            .await
            .unwrap();
        assert_eq!(tracker.lower_bound(), &CursorValue::parse("2023-01-01"));
    }
}
