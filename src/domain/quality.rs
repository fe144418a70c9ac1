//! Deterministic per-record quality score in [0, 1].
//!
//! | component            | weight | rule                                                   |
//! |----------------------|--------|--------------------------------------------------------|
//! | completeness         | 0.30   | 1 - missing / 5                                        |
//! | OHLC logic           | 0.20   | 1 all relationships hold, 0 otherwise, 0.5 if missing  |
//! | volume               | 0.15   | 0 negative, 0.3 zero, 1 positive, 0.5 missing          |
//! | outlier magnitude    | 0.20   | 1 / 0.7 / 0.4 / 0 within 1x / 2x / 3x / beyond         |
//! | neighbor consistency | 0.15   | 1 both moves within 20%, 0.3 otherwise, 0.5 missing    |
//!
//! The first record scores 1 on outlier magnitude; first and last records
//! score 1 on neighbor consistency.

use crate::domain::records::{PriceFields, PriceRecord};
use crate::domain::validator::{DEFAULT_OUTLIER_THRESHOLD, pct_change};
use serde::Serialize;

pub const NEIGHBOR_TOLERANCE: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityWeights {
    pub completeness: f64,
    pub ohlc_logic: f64,
    pub volume: f64,
    pub outlier_magnitude: f64,
    pub neighbor_consistency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.30,
            ohlc_logic: 0.20,
            volume: 0.15,
            outlier_magnitude: 0.20,
            neighbor_consistency: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub completeness: f64,
    pub ohlc_logic: f64,
    pub volume: f64,
    pub outlier_magnitude: f64,
    pub neighbor_consistency: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScorer {
    weights: QualityWeights,
    outlier_threshold: f64,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTLIER_THRESHOLD)
    }
}

impl QualityScorer {
    pub fn new(outlier_threshold: f64) -> Self {
        Self {
            weights: QualityWeights::default(),
            outlier_threshold,
        }
    }

    pub fn with_weights(mut self, weights: QualityWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn score_batch<R: PriceRecord>(&self, batch: &[R]) -> Vec<f64> {
        self.breakdown_batch(batch)
            .into_iter()
            .map(|b| b.score)
            .collect()
    }

    pub fn breakdown_batch<R: PriceRecord>(&self, batch: &[R]) -> Vec<QualityBreakdown> {
        let fields: Vec<PriceFields> = batch.iter().map(PriceRecord::fields).collect();
        (0..fields.len())
            .map(|i| {
                let prev = i.checked_sub(1).map(|p| &fields[p]);
                let next = fields.get(i + 1);
                self.score_record(&fields[i], prev, next)
            })
            .collect()
    }

    pub fn score_record(
        &self,
        current: &PriceFields,
        prev: Option<&PriceFields>,
        next: Option<&PriceFields>,
    ) -> QualityBreakdown {
        let completeness = completeness_score(current);
        let ohlc_logic = ohlc_logic_score(current);
        let volume = volume_score(current.volume);
        let outlier_magnitude = match prev {
            None => 1.0,
            Some(p) => self.outlier_magnitude_score(p.close, current.close),
        };
        let neighbor_consistency = match (prev, next) {
            (Some(p), Some(n)) => neighbor_consistency_score(p.close, current.close, n.close),
            _ => 1.0,
        };

        let w = &self.weights;
        let score = (completeness * w.completeness
            + ohlc_logic * w.ohlc_logic
            + volume * w.volume
            + outlier_magnitude * w.outlier_magnitude
            + neighbor_consistency * w.neighbor_consistency)
            .clamp(0.0, 1.0);

        QualityBreakdown {
            completeness,
            ohlc_logic,
            volume,
            outlier_magnitude,
            neighbor_consistency,
            score,
        }
    }

    fn outlier_magnitude_score(&self, prev: Option<f64>, cur: Option<f64>) -> f64 {
        let Some(change) = pct_change(prev, cur).map(f64::abs) else {
            return 0.5;
        };
        let t = self.outlier_threshold;
        if change <= t {
            1.0
        } else if change <= 2.0 * t {
            0.7
        } else if change <= 3.0 * t {
            0.4
        } else {
            0.0
        }
    }
}

fn completeness_score(f: &PriceFields) -> f64 {
    1.0 - f.missing().len() as f64 / PriceFields::FIELD_COUNT as f64
}

fn ohlc_logic_score(f: &PriceFields) -> f64 {
    let (Some(open), Some(high), Some(low), Some(close)) = (f.open, f.high, f.low, f.close) else {
        return 0.5;
    };
    let holds = high >= open && high >= close && low <= open && low <= close && high >= low;
    if holds { 1.0 } else { 0.0 }
}

fn volume_score(volume: Option<f64>) -> f64 {
    match volume {
        None => 0.5,
        Some(v) if v < 0.0 => 0.0,
        Some(v) if v == 0.0 => 0.3,
        Some(_) => 1.0,
    }
}

fn neighbor_consistency_score(prev: Option<f64>, cur: Option<f64>, next: Option<f64>) -> f64 {
    match (pct_change(prev, cur), pct_change(cur, next)) {
        (Some(a), Some(b)) if a.abs() <= NEIGHBOR_TOLERANCE && b.abs() <= NEIGHBOR_TOLERANCE => 1.0,
        (Some(_), Some(_)) => 0.3,
        _ => 0.5,
    }
}
