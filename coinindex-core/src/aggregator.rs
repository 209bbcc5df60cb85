//! Snapshot Aggregator: date-keyed access to validated daily snapshots.
//!
//! Never fabricates or interpolates a date. A missing date is
//! `SnapshotMissing`; a structurally bad one is `MalformedSnapshot`.

use crate::domain::DailySnapshot;
use crate::store::{SnapshotStore, StoreError};
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Clone)]
pub struct SnapshotAggregator {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotAggregator {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn load(&self, date: NaiveDate) -> Result<DailySnapshot, StoreError> {
        let snapshot = self.store.read(date)?;
        log::debug!(
            "loaded {} snapshot {date} ({} rows)",
            self.store.name(),
            snapshot.len()
        );
        Ok(snapshot)
    }

    /// Load every date in `start..=end`, stopping at the first failure.
    pub fn load_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySnapshot>, StoreError> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| self.load(d))
            .collect()
    }

    /// Dates in `start..=end` with no finalized snapshot.
    pub fn missing_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let mut missing = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            if !self.store.exists(date)? {
                missing.push(date);
            }
        }
        Ok(missing)
    }

    pub fn available_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        self.store.dates()
    }

    /// Earliest and latest finalized dates, if any.
    pub fn date_span(&self) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
        let dates = self.store.dates()?;
        Ok(dates.first().copied().zip(dates.last().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketRow;
    use crate::store::SqliteStore;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn put(store: &dyn SnapshotStore, date: &str) {
        let rows = vec![MarketRow {
            coin_id: "bitcoin".into(),
            symbol: "BTC".into(),
            price: 1.0,
            volume: 1.0,
            market_cap: 1.0,
            rank: 0,
        }];
        store
            .write(&DailySnapshot::from_rows(d(date), rows).unwrap())
            .unwrap();
    }

    #[test]
    fn load_range_fails_on_first_gap() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        put(store.as_ref(), "2025-01-01");
        put(store.as_ref(), "2025-01-03");
        let agg = SnapshotAggregator::new(store);

        match agg.load_range(d("2025-01-01"), d("2025-01-03")).unwrap_err() {
            StoreError::SnapshotMissing { date } => assert_eq!(date, d("2025-01-02")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            agg.missing_dates(d("2025-01-01"), d("2025-01-03")).unwrap(),
            vec![d("2025-01-02")]
        );
        assert_eq!(
            agg.date_span().unwrap(),
            Some((d("2025-01-01"), d("2025-01-03")))
        );
    }
}
