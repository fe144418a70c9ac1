//! Durable price storage port.
//!
//! Rows are unique on `(symbol, date)`. Inserting an existing pair fails with
//! [`PriceVaultError::DuplicateRecord`]; callers resolve it with `update` or
//! `upsert_batch`. Every batch method is one transaction.

use crate::domain::error::{PriceVaultError, ValidationError};
use crate::domain::ohlcv::{OhlcvBar, ScoredBar};
use crate::domain::records::{NormalizedPriceData, RawPriceData};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// A row to be written; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceRecord {
    pub symbol: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub quality_score: Option<f64>,
    pub is_outlier: Option<bool>,
    pub source: String,
}

impl NewPriceRecord {
    pub fn from_scored(bar: &ScoredBar, source: &str) -> Self {
        Self {
            symbol: bar.bar.symbol.clone(),
            date: bar.bar.date,
            open: bar.bar.open,
            high: bar.bar.high,
            low: bar.bar.low,
            close: bar.bar.close,
            volume: i64::try_from(bar.bar.volume).unwrap_or(i64::MAX),
            quality_score: bar.quality_score,
            is_outlier: bar.is_outlier,
            source: source.to_string(),
        }
    }

    /// The patch that makes an existing row match this record. The source
    /// column is immutable and not part of it.
    pub fn as_patch(&self) -> PricePatch {
        PricePatch {
            open: Some(self.open),
            high: Some(self.high),
            low: Some(self.low),
            close: Some(self.close),
            volume: Some(self.volume),
            quality_score: self.quality_score,
            is_outlier: self.is_outlier,
            ..PricePatch::default()
        }
    }
}

impl From<&NormalizedPriceData> for NewPriceRecord {
    fn from(n: &NormalizedPriceData) -> Self {
        Self {
            symbol: n.symbol.clone(),
            date: n.date,
            open: n.open,
            high: n.high,
            low: n.low,
            close: n.close,
            volume: n.volume,
            quality_score: Some(n.quality_score),
            is_outlier: Some(n.is_outlier),
            source: n.source.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPrice {
    pub id: i64,
    pub symbol: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub quality_score: Option<f64>,
    pub is_outlier: Option<bool>,
    pub sma_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub volatility_20: Option<f64>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredPrice {
    pub fn to_bar(&self) -> Result<OhlcvBar, ValidationError> {
        let volume = u64::try_from(self.volume).map_err(|_| {
            ValidationError::new("volume", format!("must be non-negative, got {}", self.volume))
        })?;
        OhlcvBar::new(
            self.symbol.clone(),
            self.date,
            self.open,
            self.high,
            self.low,
            self.close,
            volume,
        )
    }

    pub fn to_scored(&self) -> Result<ScoredBar, ValidationError> {
        Ok(ScoredBar {
            bar: self.to_bar()?,
            quality_score: self.quality_score,
            is_outlier: self.is_outlier,
        })
    }

    pub fn to_raw(&self) -> RawPriceData {
        RawPriceData::new(self.symbol.clone(), self.date, self.source.clone()).with_ohlcv(
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume as f64,
        )
    }
}

/// Column changes for one row; `None` leaves the column as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricePatch {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub quality_score: Option<f64>,
    pub is_outlier: Option<bool>,
    pub sma_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub volatility_20: Option<f64>,
}

impl PricePatch {
    pub fn is_empty(&self) -> bool {
        *self == PricePatch::default()
    }

    pub fn apply(&self, row: &mut StoredPrice) {
        fn set<T: Copy>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        fn set_opt<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        set(&mut row.open, self.open);
        set(&mut row.high, self.high);
        set(&mut row.low, self.low);
        set(&mut row.close, self.close);
        set(&mut row.volume, self.volume);
        set_opt(&mut row.quality_score, self.quality_score);
        set_opt(&mut row.is_outlier, self.is_outlier);
        set_opt(&mut row.sma_20, self.sma_20);
        set_opt(&mut row.rsi_14, self.rsi_14);
        set_opt(&mut row.volatility_20, self.volatility_20);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub backend: String,
    pub total_records: u64,
    pub symbol_count: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub scored_records: u64,
    pub average_quality: Option<f64>,
    pub outlier_count: u64,
}

pub trait PriceRepository: Send + Sync {
    fn insert(&self, record: &NewPriceRecord) -> Result<StoredPrice, PriceVaultError>;

    fn insert_batch(&self, records: &[NewPriceRecord]) -> Result<usize, PriceVaultError>;

    /// Inserts bars under one symbol and source, whatever symbol they carry.
    fn insert_table(
        &self,
        rows: &[ScoredBar],
        symbol: &str,
        source: &str,
    ) -> Result<usize, PriceVaultError> {
        let records: Vec<NewPriceRecord> = rows
            .iter()
            .map(|row| NewPriceRecord {
                symbol: symbol.to_string(),
                ..NewPriceRecord::from_scored(row, source)
            })
            .collect();
        self.insert_batch(&records)
    }

    fn update(&self, id: i64, patch: &PricePatch) -> Result<StoredPrice, PriceVaultError>;

    fn update_batch(&self, patches: &[(i64, PricePatch)]) -> Result<usize, PriceVaultError>;

    /// Patches rows that exist and inserts the rest, in one transaction.
    fn upsert_batch(&self, records: &[NewPriceRecord]) -> Result<UpsertCounts, PriceVaultError>;

    fn get(&self, symbol: &str, date: DateTime<Utc>)
    -> Result<Option<StoredPrice>, PriceVaultError>;

    /// Inclusive on both ends, oldest first.
    fn get_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredPrice>, PriceVaultError>;

    /// Newest first.
    fn get_all(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredPrice>, PriceVaultError>;

    fn count(&self, symbol: &str) -> Result<u64, PriceVaultError>;

    fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<usize, PriceVaultError>;

    fn delete_all(&self, symbol: &str) -> Result<usize, PriceVaultError>;

    fn date_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, PriceVaultError>;

    fn all_symbols(&self) -> Result<BTreeSet<String>, PriceVaultError>;

    fn ping(&self) -> Result<(), PriceVaultError>;

    fn stats(&self) -> Result<DatabaseStats, PriceVaultError>;
}
