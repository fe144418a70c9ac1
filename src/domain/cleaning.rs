//! Missing-data repair, outlier normalization and scoring.
//!
//! `clean_data` runs the three steps in order and reports how many rows
//! survived each one. Rows that still have a gap after filling (an entirely
//! empty column) are dropped.

use crate::domain::error::ValidationError;
use crate::domain::indicators::{mean, sample_std};
use crate::domain::quality::QualityScorer;
use crate::domain::records::{CleanedPriceData, PriceRecord, RawPriceData};
use crate::domain::validator::{DEFAULT_OUTLIER_THRESHOLD, detect_outliers_in, pct_change};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

pub const DEFAULT_ROLLING_WINDOW: usize = 20;
const CLIP_SIGMAS: f64 = 2.0;
/// Keeps a capped move strictly inside the threshold after rounding.
const CAP_MARGIN: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataStrategy {
    /// Previous value, then backward-fill the head.
    #[default]
    ForwardFill,
    /// Next value, then forward-fill the tail.
    BackwardFill,
    /// Linear in position, edges filled from the nearest value.
    Interpolate,
    Drop,
}

impl fmt::Display for MissingDataStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissingDataStrategy::ForwardFill => "forward_fill",
            MissingDataStrategy::BackwardFill => "backward_fill",
            MissingDataStrategy::Interpolate => "interpolate",
            MissingDataStrategy::Drop => "drop",
        };
        f.write_str(s)
    }
}

impl FromStr for MissingDataStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward_fill" | "ffill" => Ok(MissingDataStrategy::ForwardFill),
            "backward_fill" | "bfill" => Ok(MissingDataStrategy::BackwardFill),
            "interpolate" => Ok(MissingDataStrategy::Interpolate),
            "drop" => Ok(MissingDataStrategy::Drop),
            other => Err(ValidationError::new(
                "missing_strategy",
                format!("unknown strategy '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierStrategy {
    /// Clamp into the trailing rolling mean +/- 2 stdev band.
    Clip,
    /// Replace with the 3-point average centred on the outlier.
    Smooth,
    #[default]
    Flag,
    Remove,
}

impl fmt::Display for OutlierStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutlierStrategy::Clip => "clip",
            OutlierStrategy::Smooth => "smooth",
            OutlierStrategy::Flag => "flag",
            OutlierStrategy::Remove => "remove",
        };
        f.write_str(s)
    }
}

impl FromStr for OutlierStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clip" => Ok(OutlierStrategy::Clip),
            "smooth" => Ok(OutlierStrategy::Smooth),
            "flag" => Ok(OutlierStrategy::Flag),
            "remove" => Ok(OutlierStrategy::Remove),
            other => Err(ValidationError::new(
                "outlier_strategy",
                format!("unknown strategy '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningReport {
    pub symbol: String,
    pub input_count: usize,
    pub fields_filled: usize,
    pub rows_dropped: usize,
    pub after_missing: usize,
    pub outliers_detected: usize,
    pub outliers_adjusted: usize,
    pub outliers_removed: usize,
    pub after_outliers: usize,
    pub output_count: usize,
    pub average_quality: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleaningEngine {
    pub missing_strategy: MissingDataStrategy,
    pub outlier_strategy: OutlierStrategy,
    pub outlier_threshold: f64,
    pub rolling_window: usize,
    scorer: QualityScorer,
}

impl Default for CleaningEngine {
    fn default() -> Self {
        Self::new(
            MissingDataStrategy::default(),
            OutlierStrategy::default(),
            DEFAULT_OUTLIER_THRESHOLD,
            DEFAULT_ROLLING_WINDOW,
        )
    }
}

impl CleaningEngine {
    pub fn new(
        missing_strategy: MissingDataStrategy,
        outlier_strategy: OutlierStrategy,
        outlier_threshold: f64,
        rolling_window: usize,
    ) -> Self {
        Self {
            missing_strategy,
            outlier_strategy,
            outlier_threshold,
            rolling_window,
            scorer: QualityScorer::new(outlier_threshold),
        }
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    pub fn clean_data(
        &self,
        batch: &[RawPriceData],
        symbol: &str,
    ) -> (Vec<CleanedPriceData>, CleaningReport) {
        let mut report = CleaningReport {
            symbol: symbol.to_string(),
            input_count: batch.len(),
            ..CleaningReport::default()
        };

        let mut rows: Vec<RawPriceData> = batch.iter().map(without_nan).collect();
        report.fields_filled = self.handle_missing(&mut rows);
        let before = rows.len();
        rows.retain(|r| r.fields().is_complete());
        report.rows_dropped = before - rows.len();
        report.after_missing = rows.len();

        let outcome = self.handle_outliers(&mut rows);
        report.outliers_detected = outcome.detected;
        report.outliers_adjusted = outcome.adjusted;
        report.outliers_removed = outcome.removed;
        report.after_outliers = rows.len();

        let scores = self.scorer.score_batch(&rows);
        let cleaned: Vec<CleanedPriceData> = rows
            .into_iter()
            .zip(outcome.flags)
            .zip(scores)
            .filter_map(|((row, is_outlier), quality_score)| {
                Some(CleanedPriceData {
                    open: row.open?,
                    high: row.high?,
                    low: row.low?,
                    close: row.close?,
                    volume: row.volume?.round() as i64,
                    date: row.date,
                    symbol: row.symbol,
                    source: row.source,
                    is_outlier,
                    quality_score,
                })
            })
            .collect();

        report.output_count = cleaned.len();
        report.average_quality = mean(
            &cleaned
                .iter()
                .map(|c| c.quality_score)
                .collect::<Vec<f64>>(),
        );

        info!(
            symbol,
            input = report.input_count,
            output = report.output_count,
            filled = report.fields_filled,
            outliers = report.outliers_detected,
            "cleaned batch"
        );
        (cleaned, report)
    }

    /// Fills gaps column by column; returns the number of cells filled.
    fn handle_missing(&self, rows: &mut [RawPriceData]) -> usize {
        if self.missing_strategy == MissingDataStrategy::Drop {
            return 0;
        }
        let mut filled = 0;
        for column in Column::ALL {
            let mut values: Vec<Option<f64>> = rows.iter().map(|r| column.get(r)).collect();
            let gaps = values.iter().filter(|v| v.is_none()).count();
            if gaps == 0 {
                continue;
            }
            match self.missing_strategy {
                MissingDataStrategy::ForwardFill => {
                    forward_fill(&mut values);
                    backward_fill(&mut values);
                }
                MissingDataStrategy::BackwardFill => {
                    backward_fill(&mut values);
                    forward_fill(&mut values);
                }
                MissingDataStrategy::Interpolate => {
                    interpolate(&mut values);
                    forward_fill(&mut values);
                    backward_fill(&mut values);
                }
                MissingDataStrategy::Drop => {}
            }
            filled += gaps - values.iter().filter(|v| v.is_none()).count();
            for (row, value) in rows.iter_mut().zip(values) {
                column.set(row, value);
            }
        }
        if filled > 0 {
            debug!(filled, strategy = %self.missing_strategy, "filled missing values");
        }
        filled
    }

    fn handle_outliers(&self, rows: &mut Vec<RawPriceData>) -> OutlierOutcome {
        if let strategy @ (OutlierStrategy::Clip | OutlierStrategy::Smooth) = self.outlier_strategy {
            return self.adjust_outliers(rows, strategy);
        }

        let closes: Vec<Option<f64>> = rows.iter().map(|r| r.close).collect();
        let flags = detect_outliers_in(&closes, self.outlier_threshold);
        let detected = flags.iter().filter(|f| **f).count();
        let mut outcome = OutlierOutcome {
            detected,
            adjusted: 0,
            removed: 0,
            flags,
        };
        if detected > 0 && self.outlier_strategy == OutlierStrategy::Remove {
            let mut keep = outcome.flags.iter().map(|f| !f);
            rows.retain(|_| keep.next().unwrap_or(true));
            outcome.removed = detected;
            outcome.flags = vec![false; rows.len()];
        }
        outcome
    }

    /// Walks forward comparing each close with the previous output close, so a
    /// repaired row is the baseline for the next one. Clip bands come from the
    /// trailing output rows; smoothing averages the untouched input. The
    /// returned flags mark rows that are still outliers in the output, which
    /// is what a second pass over the output detects.
    fn adjust_outliers(&self, rows: &mut [RawPriceData], strategy: OutlierStrategy) -> OutlierOutcome {
        let input = rows.to_vec();
        let threshold = self.outlier_threshold;
        let mut adjusted = 0;

        for i in 1..rows.len() {
            let prev = rows[i - 1].close;
            if !exceeds(prev, rows[i].close, threshold) {
                continue;
            }
            for column in Column::PRICES {
                let value = if strategy == OutlierStrategy::Clip {
                    let trailing: Vec<f64> = rows[i.saturating_sub(self.rolling_window)..i]
                        .iter()
                        .filter_map(|r| column.get(r))
                        .collect();
                    clip(column.get(&rows[i]), &trailing)
                } else {
                    smooth(&input, i, column)
                };
                column.set(&mut rows[i], value);
            }
            if strategy == OutlierStrategy::Smooth {
                cap_move(&mut rows[i], prev, threshold);
            }
            repair_envelope(&mut rows[i]);
            adjusted += 1;
        }

        if adjusted > 0 {
            debug!(count = adjusted, strategy = %strategy, "adjusted outliers");
        }
        let closes: Vec<Option<f64>> = rows.iter().map(|r| r.close).collect();
        OutlierOutcome {
            flags: detect_outliers_in(&closes, threshold),
            detected: adjusted,
            adjusted,
            removed: 0,
        }
    }
}

/// Flags line up with the rows that survived outlier handling.
struct OutlierOutcome {
    flags: Vec<bool>,
    detected: usize,
    adjusted: usize,
    removed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Column {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Column {
    const ALL: [Column; 5] = [
        Column::Open,
        Column::High,
        Column::Low,
        Column::Close,
        Column::Volume,
    ];
    const PRICES: [Column; 4] = [Column::Open, Column::High, Column::Low, Column::Close];

    fn get(self, row: &RawPriceData) -> Option<f64> {
        match self {
            Column::Open => row.open,
            Column::High => row.high,
            Column::Low => row.low,
            Column::Close => row.close,
            Column::Volume => row.volume,
        }
    }

    fn set(self, row: &mut RawPriceData, value: Option<f64>) {
        let slot = match self {
            Column::Open => &mut row.open,
            Column::High => &mut row.high,
            Column::Low => &mut row.low,
            Column::Close => &mut row.close,
            Column::Volume => &mut row.volume,
        };
        *slot = value;
    }
}

fn without_nan(row: &RawPriceData) -> RawPriceData {
    let f = row.fields();
    RawPriceData {
        open: f.open,
        high: f.high,
        low: f.low,
        close: f.close,
        volume: f.volume,
        ..row.clone()
    }
}

fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
}

fn backward_fill(values: &mut [Option<f64>]) {
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
}

/// Linear interpolation between known points; edges are left untouched.
fn interpolate(values: &mut [Option<f64>]) {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|x| (i, x)))
        .collect();
    for pair in known.windows(2) {
        let (i0, v0) = pair[0];
        let (i1, v1) = pair[1];
        let span = (i1 - i0) as f64;
        for (i, slot) in values.iter_mut().enumerate().take(i1).skip(i0 + 1) {
            *slot = Some(v0 + (v1 - v0) * (i - i0) as f64 / span);
        }
    }
}

fn exceeds(prev: Option<f64>, cur: Option<f64>, threshold: f64) -> bool {
    pct_change(prev, cur).is_some_and(|change| change.abs() > threshold)
}

/// Clamps `value` into mean +/- 2 stdev of `trailing`; needs two values.
fn clip(value: Option<f64>, trailing: &[f64]) -> Option<f64> {
    let v = value?;
    match (mean(trailing), sample_std(trailing)) {
        (Some(m), Some(sd)) => Some(v.clamp(m - CLIP_SIGMAS * sd, m + CLIP_SIGMAS * sd)),
        _ => Some(v),
    }
}

/// Mean of the input values at `i - 1..=i + 1`, truncated at the edges.
fn smooth(input: &[RawPriceData], i: usize, column: Column) -> Option<f64> {
    let lo = i.saturating_sub(1);
    let hi = (i + 1).min(input.len() - 1);
    let window: Vec<f64> = input[lo..=hi].iter().filter_map(|r| column.get(r)).collect();
    mean(&window)
}

/// Pulls a smoothed close that still jumps past the threshold back inside it.
fn cap_move(row: &mut RawPriceData, prev: Option<f64>, threshold: f64) {
    let (Some(p), Some(c)) = (prev, row.close) else {
        return;
    };
    if !exceeds(prev, row.close, threshold) {
        return;
    }
    let band = threshold * (1.0 - CAP_MARGIN);
    row.close = Some(c.clamp(p * (1.0 - band), p * (1.0 + band)));
}

fn repair_envelope(row: &mut RawPriceData) {
    let (Some(o), Some(h), Some(l), Some(c)) = (row.open, row.high, row.low, row.close) else {
        return;
    };
    row.high = Some(o.max(h).max(l).max(c));
    row.low = Some(o.min(h).min(l).min(c));
}
