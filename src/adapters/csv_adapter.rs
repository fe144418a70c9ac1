//! CSV raw data source.
//!
//! Files have a header row `date,open,high,low,close,volume`; an empty cell
//! is a missing value. Dates are `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` (read
//! in the market timezone later on) or RFC 3339 with an offset.

use crate::domain::error::PriceVaultError;
use crate::domain::records::{RawPriceData, RawTimestamp};
use crate::ports::data_port::RawDataSource;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

/// Reads `<base_path>/<symbol>.csv`, or a single fixed file.
pub struct CsvRawSource {
    location: Location,
    source_name: String,
}

enum Location {
    Directory(PathBuf),
    File(PathBuf),
}

impl CsvRawSource {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            location: Location::Directory(base_path),
            source_name: "csv".to_string(),
        }
    }

    /// Every symbol fetched from this source reads the same file.
    pub fn from_file(path: PathBuf) -> Self {
        Self {
            location: Location::File(path),
            source_name: "csv".to_string(),
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        match &self.location {
            Location::Directory(base) => base.join(format!("{symbol}.csv")),
            Location::File(path) => path.clone(),
        }
    }

    /// Symbols with a file under the base directory.
    pub fn list_symbols(&self) -> Result<Vec<String>, PriceVaultError> {
        let Location::Directory(base) = &self.location else {
            return Ok(Vec::new());
        };
        let mut symbols = Vec::new();
        for entry in fs::read_dir(base)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    symbols.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    fn parse(&self, path: &Path, symbol: &str) -> Result<Vec<RawPriceData>, PriceVaultError> {
        let content = fs::read_to_string(path).map_err(|e| PriceVaultError::Source {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut records = Vec::new();
        for (line, result) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = result.map_err(|e| PriceVaultError::Source {
                reason: format!("{}: CSV parse error: {e}", path.display()),
            })?;
            let date = parse_timestamp(&row.date).ok_or_else(|| PriceVaultError::Source {
                reason: format!(
                    "{}: row {}: invalid date '{}'",
                    path.display(),
                    line + 1,
                    row.date
                ),
            })?;
            let mut record = RawPriceData::new(symbol, date, self.source_name.clone());
            record.open = row.open;
            record.high = row.high;
            record.low = row.low;
            record.close = row.close;
            record.volume = row.volume;
            records.push(record);
        }

        debug!(symbol, rows = records.len(), path = %path.display(), "read CSV");
        Ok(records)
    }
}

impl RawDataSource for CsvRawSource {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn fetch(&self, symbol: &str) -> Result<Vec<RawPriceData>, PriceVaultError> {
        let path = self.csv_path(symbol);
        self.parse(&path, symbol)
    }
}

fn parse_timestamp(s: &str) -> Option<RawTimestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.into());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(n.into());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Into::into)
}
