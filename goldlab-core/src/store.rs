//! Record store: the persisted price history.
//!
//! Layout: `{data_dir}/{file_name}` (CSV, header row) with two siblings:
//! - `{stem}_backup.csv`, the previous generation (when backups are enabled)
//! - `{file_name}.meta.json`, the metadata sidecar (count, date range, BLAKE3 hash)
//!
//! The store is read whole and rewritten whole. Writes go to `.tmp` first and
//! are renamed into place, so readers never see a half-written file.

use crate::domain::{PriceRecord, Timestamp};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Column order of the persisted file.
pub const COLUMNS: [&str; 6] = [
    "timestamp",
    "company",
    "gold_type",
    "buy_price",
    "sell_price",
    "location",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("metadata error: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("no backup found at {0}")]
    NoBackup(PathBuf),

    #[error("store header at {0} is missing required columns")]
    BadHeader(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whole-collection persistence for price records.
pub trait RecordStore {
    /// Every stored record. An absent store is empty.
    fn load(&self) -> Result<Vec<PriceRecord>, StoreError>;

    /// Replace the stored collection.
    fn rewrite(&self, records: &[PriceRecord]) -> Result<(), StoreError>;

    /// Latest parsable calendar date in the store.
    fn last_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(last_date(&self.load()?))
    }
}

/// Latest calendar date across records; malformed timestamps are ignored.
pub fn last_date(records: &[PriceRecord]) -> Option<NaiveDate> {
    records.iter().filter_map(|r| r.timestamp.to_date()).max()
}

/// Records sorted the way the store persists them: by timestamp, then
/// company, then field-table order within a company.
pub fn sort_for_storage(records: &mut [PriceRecord]) {
    records.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.company.cmp(&b.company))
            .then_with(|| a.table_rank().cmp(&b.table_rank()))
            .then_with(|| a.key().cmp(&b.key()))
    });
}

/// Metadata sidecar written next to the store file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub record_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub data_hash: String,
    pub written_at: NaiveDateTime,
}

/// On-disk row. `gold_type` is the persisted name of the instrument column.
#[derive(Debug, Serialize)]
struct StoredRow {
    timestamp: String,
    company: String,
    gold_type: String,
    buy_price: Option<f64>,
    sell_price: Option<f64>,
    location: String,
}

impl From<&PriceRecord> for StoredRow {
    fn from(r: &PriceRecord) -> Self {
        StoredRow {
            timestamp: r.timestamp.to_string(),
            company: r.company.clone(),
            gold_type: r.instrument.clone(),
            buy_price: r.buy_price,
            sell_price: r.sell_price,
            location: r.location.clone(),
        }
    }
}

/// CSV-backed record store.
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
    keep_backup: bool,
}

impl CsvRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep_backup: true,
        }
    }

    pub fn in_dir(data_dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self::new(data_dir.as_ref().join(file_name))
    }

    pub fn with_backup(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// `{stem}_backup.csv` next to the store file.
    pub fn backup_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        self.path.with_file_name(format!("{stem}_backup.csv"))
    }

    pub fn meta_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".meta.json");
        self.path.with_file_name(name)
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("csv.tmp")
    }

    /// Read the metadata sidecar, if one exists and parses.
    pub fn meta(&self) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Copy the backup over the live file. The sidecar is refreshed from the
    /// restored content.
    pub fn restore_backup(&self) -> Result<usize, StoreError> {
        let backup = self.backup_path();
        if !backup.exists() {
            return Err(StoreError::NoBackup(backup));
        }
        fs::copy(&backup, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let records = self.load()?;
        let bytes = fs::read(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        self.write_meta(&records, &bytes)?;
        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            "restored store from backup"
        );
        Ok(records.len())
    }

    /// Write records as CSV to an arbitrary path (no backup, no sidecar).
    pub fn export(&self, dest: &Path) -> Result<usize, StoreError> {
        let mut records = self.load()?;
        sort_for_storage(&mut records);
        let bytes = encode(&records)?;
        fs::write(dest, bytes).map_err(|e| StoreError::io(dest, e))?;
        Ok(records.len())
    }

    fn write_meta(&self, records: &[PriceRecord], bytes: &[u8]) -> Result<(), StoreError> {
        let dates = records.iter().filter_map(|r| r.timestamp.to_date());
        let first_date = dates.clone().min();
        let last_date = dates.max();
        let meta = StoreMeta {
            record_count: records.len(),
            first_date,
            last_date,
            data_hash: blake3::hash(bytes).to_hex().to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_path = self.meta_path();
        let json = serde_json::to_string_pretty(&meta)?;
        fs::write(&meta_path, json).map_err(|e| StoreError::io(&meta_path, e))
    }
}

impl RecordStore for CsvRecordStore {
    fn load(&self) -> Result<Vec<PriceRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        decode(file, &self.path)
    }

    fn rewrite(&self, records: &[PriceRecord]) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let mut sorted = records.to_vec();
        sort_for_storage(&mut sorted);
        let bytes = encode(&sorted)?;

        if self.keep_backup && self.path.exists() {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup).map_err(|e| StoreError::io(&backup, e))?;
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&self.path, e)
        })?;

        self.write_meta(&sorted, &bytes)?;
        tracing::debug!(path = %self.path.display(), records = sorted.len(), "store rewritten");
        Ok(())
    }
}

fn encode(records: &[PriceRecord]) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.serialize(StoredRow::from(record))?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::io(Path::new("<buffer>"), e.into_error()))
}

/// Column positions resolved from the header row, so column order may vary.
struct ColumnIndex {
    timestamp: usize,
    company: usize,
    instrument: usize,
    buy: usize,
    sell: usize,
    location: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Option<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        Some(Self {
            timestamp: find("timestamp")?,
            company: find("company")?,
            instrument: find("gold_type")?,
            buy: find("buy_price")?,
            sell: find("sell_price")?,
            location: find("location"),
        })
    }
}

fn parse_price(cell: Option<&str>) -> Option<f64> {
    let cell = cell?.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|p| p.is_finite())
}

fn decode<R: io::Read>(reader: R, path: &Path) -> Result<Vec<PriceRecord>, StoreError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let Some(cols) = ColumnIndex::from_headers(&headers) else {
        return Err(StoreError::BadHeader(path.to_path_buf()));
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) if row.len() == headers.len() => row,
            Ok(_) | Err(_) => {
                skipped += 1;
                tracing::warn!(
                    path = %path.display(),
                    line = line + 2,
                    "skipping malformed store row"
                );
                continue;
            }
        };
        let cell = |i: usize| row.get(i).unwrap_or("");
        records.push(PriceRecord::new(
            Timestamp::new(cell(cols.timestamp).trim()),
            cell(cols.company),
            cell(cols.instrument).trim(),
            cols.location.map_or("", cell),
            parse_price(row.get(cols.buy)),
            parse_price(row.get(cols.sell)),
        ));
    }
    if skipped > 0 {
        tracing::info!(
            path = %path.display(),
            skipped,
            loaded = records.len(),
            "store loaded with skipped rows"
        );
    }
    Ok(records)
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PriceRecord>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new(records: Vec<PriceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            writes: Mutex::new(0),
        }
    }

    /// Number of `rewrite` calls so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<PriceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordStore for MemoryStore {
    fn load(&self) -> Result<Vec<PriceRecord>, StoreError> {
        Ok(self.snapshot())
    }

    fn rewrite(&self, records: &[PriceRecord]) -> Result<(), StoreError> {
        let mut sorted = records.to_vec();
        sort_for_storage(&mut sorted);
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = sorted;
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
