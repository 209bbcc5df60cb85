//! Flat-file snapshot store.
//!
//! Layout: `{root}/{YYYY}/{MM}/{YYYY-MM-DD}.csv`, one file per date, header
//! `date,coin_id,symbol,price,volume,market_cap,rank`. Writes go to a `.tmp`
//! sibling which is renamed into place.

use super::validate::{parse_row, RawValue, COLUMNS};
use super::{SnapshotStore, StoreError};
use crate::domain::{DailySnapshot, MarketRow};
use chrono::{Datelike, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};

pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{YYYY}/{MM}/{YYYY-MM-DD}.csv`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{date}.csv"))
    }

    fn column_positions(
        date: NaiveDate,
        header: &csv::StringRecord,
    ) -> Result<[usize; 7], StoreError> {
        if header.is_empty() || header.iter().all(str::is_empty) {
            return Err(StoreError::malformed(date, 0, "*", "file is empty"));
        }
        let mut positions = [0usize; 7];
        for (slot, name) in positions.iter_mut().zip(COLUMNS) {
            *slot = header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| StoreError::malformed(date, 0, name, "column missing"))?;
        }
        Ok(positions)
    }
}

impl SnapshotStore for FlatFileStore {
    fn name(&self) -> &str {
        "flat"
    }

    fn read_rows(&self, date: NaiveDate) -> Result<Vec<MarketRow>, StoreError> {
        let path = self.path_for(date);
        if !path.is_file() {
            return Err(StoreError::SnapshotMissing { date });
        }
        let file = fs::File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(file);

        let header = reader
            .headers()
            .map_err(|e| StoreError::malformed(date, 0, "*", e.to_string()))?
            .clone();
        let positions = Self::column_positions(date, &header)?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record =
                record.map_err(|e| StoreError::malformed(date, i + 1, "*", e.to_string()))?;
            let values = positions.map(|p| RawValue::Text(&record[p]));
            rows.push(parse_row(date, i + 1, &values)?);
        }
        Ok(rows)
    }

    fn write(&self, snapshot: &DailySnapshot) -> Result<(), StoreError> {
        let path = self.path_for(snapshot.date());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let tmp = path.with_extension("csv.tmp");

        let result = write_csv(&tmp, snapshot)
            .and_then(|()| fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e)));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.path_for(date).is_file())
    }

    fn dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        Ok(self.scan()?.0)
    }
}

impl FlatFileStore {
    /// Date-named snapshot files sitting outside their `{YYYY}/{MM}` folder.
    /// They are invisible to `exists` and `read`, so `dates` skips them too.
    pub fn misplaced_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>, StoreError> {
        Ok(self.scan()?.1)
    }

    fn scan(&self) -> Result<(Vec<NaiveDate>, Vec<(NaiveDate, PathBuf)>), StoreError> {
        let mut dates = Vec::new();
        let mut misplaced = Vec::new();
        if !self.root.is_dir() {
            return Ok((dates, misplaced));
        }
        for year in subdirs(&self.root)? {
            for month in subdirs(&year)? {
                let entries = fs::read_dir(&month).map_err(|e| StoreError::io(&month, e))?;
                for entry in entries {
                    let path = entry.map_err(|e| StoreError::io(&month, e))?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                        continue;
                    }
                    let parsed = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
                    let Some(date) = parsed else {
                        continue;
                    };
                    if path == self.path_for(date) {
                        dates.push(date);
                    } else {
                        misplaced.push((date, path));
                    }
                }
            }
        }
        dates.sort_unstable();
        misplaced.sort();
        Ok((dates, misplaced))
    }
}

fn write_csv(path: &Path, snapshot: &DailySnapshot) -> Result<(), StoreError> {
    let io = |e: csv::Error| StoreError::io(path, e.into());
    let mut writer = csv::Writer::from_path(path).map_err(io)?;
    writer.write_record(COLUMNS).map_err(io)?;

    let date = snapshot.date().to_string();
    for row in snapshot.rows() {
        writer
            .write_record([
                date.clone(),
                row.coin_id.clone(),
                row.symbol.clone(),
                row.price.to_string(),
                row.volume.to_string(),
                row.market_cap.to_string(),
                row.rank.to_string(),
            ])
            .map_err(io)?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        let numeric = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()));
        if path.is_dir() && numeric {
            out.push(path);
        }
    }
    Ok(out)
}
