//! SQLite snapshot store.
//!
//! All dates live in one `daily_market_data` table keyed by `(date, coin_id)`;
//! `snapshot_dates` records which dates are finalized. Rewriting a date is one
//! transaction (delete then insert), so a failed write leaves the previous
//! snapshot in place.

use super::validate::{parse_row, RawValue};
use super::{SnapshotStore, StoreError};
use crate::domain::{DailySnapshot, MarketRow};
use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS daily_market_data (
        date TEXT NOT NULL,
        coin_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        price REAL NOT NULL,
        volume REAL NOT NULL,
        market_cap REAL NOT NULL,
        rank INTEGER NOT NULL,
        PRIMARY KEY (date, coin_id)
    );
    CREATE INDEX IF NOT EXISTS idx_market_data_date_rank ON daily_market_data(date, rank);
    CREATE TABLE IF NOT EXISTS snapshot_dates (
        date TEXT PRIMARY KEY,
        row_count INTEGER NOT NULL
    );
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn read_rows(&self, date: NaiveDate) -> Result<Vec<MarketRow>, StoreError> {
        let key = date.to_string();
        let conn = self.conn();

        let finalized: Option<i64> = conn
            .query_row(
                "SELECT row_count FROM snapshot_dates WHERE date = ?1",
                [&key],
                |r| r.get(0),
            )
            .optional()?;
        if finalized.is_none() {
            return Err(StoreError::SnapshotMissing { date });
        }

        let mut stmt = conn.prepare(
            "SELECT date, coin_id, symbol, price, volume, market_cap, rank
             FROM daily_market_data WHERE date = ?1 ORDER BY rowid",
        )?;
        let mut cursor = stmt.query([&key])?;

        let mut rows = Vec::new();
        while let Some(record) = cursor.next()? {
            let n = rows.len() + 1;
            let mut values = [RawValue::Null; 7];
            for (i, slot) in values.iter_mut().enumerate() {
                *slot = match record.get_ref(i)? {
                    ValueRef::Null => RawValue::Null,
                    ValueRef::Integer(v) => RawValue::Integer(v),
                    ValueRef::Real(v) => RawValue::Real(v),
                    ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                        Ok(s) => RawValue::Text(s),
                        Err(_) => RawValue::Other,
                    },
                    ValueRef::Blob(_) => RawValue::Other,
                };
            }
            rows.push(parse_row(date, n, &values)?);
        }
        Ok(rows)
    }

    fn write(&self, snapshot: &DailySnapshot) -> Result<(), StoreError> {
        let key = snapshot.date().to_string();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM daily_market_data WHERE date = ?1", [&key])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO daily_market_data
                 (date, coin_id, symbol, price, volume, market_cap, rank)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in snapshot.rows() {
                insert.execute(params![
                    key,
                    row.coin_id,
                    row.symbol,
                    row.price,
                    row.volume,
                    row.market_cap,
                    row.rank,
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO snapshot_dates (date, row_count) VALUES (?1, ?2)",
            params![key, snapshot.len() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM snapshot_dates WHERE date = ?1",
                [date.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT date FROM snapshot_dates ORDER BY date")?;
        let keys = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut dates: Vec<NaiveDate> = keys
            .iter()
            .filter_map(|k| NaiveDate::parse_from_str(k, "%Y-%m-%d").ok())
            .collect();
        dates.sort_unstable();
        Ok(dates)
    }
}
