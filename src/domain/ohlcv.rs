//! Canonical OHLCV bar handed to backtesting consumers.

use crate::domain::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvBar {
    pub symbol: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcvBar {
    /// Builds a bar, rejecting non-positive prices and broken OHLC envelopes.
    pub fn new(
        symbol: impl Into<String>,
        date: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        let bar = Self {
            symbol: symbol.into(),
            date,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.check_invariants()?;
        Ok(bar)
    }

    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ValidationError::new(
                    field,
                    format!("price must be positive, got {value}"),
                ));
            }
        }
        if self.high < self.open.max(self.low).max(self.close) {
            return Err(ValidationError::new(
                "high",
                format!("{} is below max(open, low, close)", self.high),
            ));
        }
        if self.low > self.open.min(self.high).min(self.close) {
            return Err(ValidationError::new(
                "low",
                format!("{} is above min(open, high, close)", self.low),
            ));
        }
        Ok(())
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Canonical bar plus the quality side channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredBar {
    #[serde(flatten)]
    pub bar: OhlcvBar,
    pub quality_score: Option<f64>,
    pub is_outlier: Option<bool>,
}
