//! Pipeline record stages: Raw -> Cleaned -> Normalized.
//!
//! Each stage is a plain struct; stage transitions are explicit conversions
//! performed by the cleaning engine and the normalizer. The canonical output
//! shape lives in [`crate::domain::ohlcv`].

use crate::domain::error::ValidationError;
use crate::domain::ohlcv::{OhlcvBar, ScoredBar};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Timestamp as delivered by a fetcher, possibly without a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RawTimestamp {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

impl RawTimestamp {
    /// Ordering key. Naive stamps are compared as-is.
    pub fn sort_key(&self) -> NaiveDateTime {
        match self {
            RawTimestamp::Naive(n) => *n,
            RawTimestamp::Aware(dt) => dt.naive_utc(),
        }
    }

    /// Calendar date as seen from the market's timezone.
    pub fn trading_date(&self, tz: Tz) -> NaiveDate {
        match self {
            RawTimestamp::Naive(n) => n.date(),
            RawTimestamp::Aware(dt) => dt.with_timezone(&tz).date_naive(),
        }
    }

    /// Wall-clock time in the market's timezone.
    pub fn market_time(&self, tz: Tz) -> NaiveTime {
        match self {
            RawTimestamp::Naive(n) => n.time(),
            RawTimestamp::Aware(dt) => dt.with_timezone(&tz).time(),
        }
    }

    /// Resolves to UTC. Naive stamps are read in `assume`; a local time that
    /// falls into a DST gap yields `None`.
    pub fn to_utc(&self, assume: Tz) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Naive(n) => assume
                .from_local_datetime(n)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            RawTimestamp::Aware(dt) => Some(dt.with_timezone(&Utc)),
        }
    }

    pub fn is_naive(&self) -> bool {
        matches!(self, RawTimestamp::Naive(_))
    }
}

impl From<NaiveDate> for RawTimestamp {
    fn from(date: NaiveDate) -> Self {
        RawTimestamp::Naive(date.and_time(NaiveTime::MIN))
    }
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(n: NaiveDateTime) -> Self {
        RawTimestamp::Naive(n)
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        RawTimestamp::Aware(dt.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for RawTimestamp {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        RawTimestamp::Aware(dt)
    }
}

/// Numeric view shared by every stage. NaN is folded into `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceFields {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl PriceFields {
    pub const FIELD_COUNT: usize = 5;

    pub fn new(
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
        close: Option<f64>,
        volume: Option<f64>,
    ) -> Self {
        let present = |v: Option<f64>| v.filter(|x| !x.is_nan());
        Self {
            open: present(open),
            high: present(high),
            low: present(low),
            close: present(close),
            volume: present(volume),
        }
    }

    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.is_none().then_some(name))
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Anything the validator and scorer can inspect.
pub trait PriceRecord {
    fn fields(&self) -> PriceFields;
    fn timestamp(&self) -> RawTimestamp;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPriceData {
    pub date: RawTimestamp,
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub source: String,
}

impl RawPriceData {
    pub fn new(
        symbol: impl Into<String>,
        date: impl Into<RawTimestamp>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            symbol: symbol.into(),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            source: source.into(),
        }
    }

    pub fn with_ohlcv(mut self, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.close = Some(close);
        self.volume = Some(volume);
        self
    }
}

impl PriceRecord for RawPriceData {
    fn fields(&self) -> PriceFields {
        PriceFields::new(self.open, self.high, self.low, self.close, self.volume)
    }

    fn timestamp(&self) -> RawTimestamp {
        self.date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedPriceData {
    pub date: RawTimestamp,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub source: String,
    pub is_outlier: bool,
    pub quality_score: f64,
}

impl From<&CleanedPriceData> for RawPriceData {
    fn from(c: &CleanedPriceData) -> Self {
        RawPriceData {
            date: c.date,
            symbol: c.symbol.clone(),
            open: Some(c.open),
            high: Some(c.high),
            low: Some(c.low),
            close: Some(c.close),
            volume: Some(c.volume as f64),
            source: c.source.clone(),
        }
    }
}

impl PriceRecord for CleanedPriceData {
    fn fields(&self) -> PriceFields {
        PriceFields::new(
            Some(self.open),
            Some(self.high),
            Some(self.low),
            Some(self.close),
            Some(self.volume as f64),
        )
    }

    fn timestamp(&self) -> RawTimestamp {
        self.date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPriceData {
    pub date: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub source: String,
    pub is_outlier: bool,
    pub quality_score: f64,
    pub is_trading_day: bool,
    pub trading_hours_aligned: bool,
    pub original_timezone: String,
}

impl NormalizedPriceData {
    /// Promotes to the canonical bar; fails if the envelope is broken or the
    /// volume is negative.
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
            quality_score: Some(self.quality_score),
            is_outlier: Some(self.is_outlier),
        })
    }

    /// Demotes back to the raw stage so the pipeline can be re-run.
    pub fn to_raw(&self) -> RawPriceData {
        RawPriceData {
            date: self.date.into(),
            symbol: self.symbol.clone(),
            open: Some(self.open),
            high: Some(self.high),
            low: Some(self.low),
            close: Some(self.close),
            volume: Some(self.volume as f64),
            source: self.source.clone(),
        }
    }
}

impl PriceRecord for NormalizedPriceData {
    fn fields(&self) -> PriceFields {
        PriceFields::new(
            Some(self.open),
            Some(self.high),
            Some(self.low),
            Some(self.close),
            Some(self.volume as f64),
        )
    }

    fn timestamp(&self) -> RawTimestamp {
        self.date.into()
    }
}
