//! Record and batch validation.
//!
//! Everything here is pure. Hard per-record problems (broken OHLC envelope,
//! non-positive prices, bad volume) are errors; missing fields, outliers and
//! calendar misalignment are warnings. Batch checks return a
//! [`ValidationResult`] report and never fail.

use crate::domain::asset_profile::AssetRegistry;
use crate::domain::calendar::{NonTradingReason, TradingCalendar};
use crate::domain::indicators::{mean, sample_std};
use crate::domain::records::PriceRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 0.20;
pub const MAX_VOLUME_CV: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum IssueKind {
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("high {high} is below open {open}")]
    HighBelowOpen { high: f64, open: f64 },

    #[error("high {high} is below close {close}")]
    HighBelowClose { high: f64, close: f64 },

    #[error("low {low} is above open {open}")]
    LowAboveOpen { low: f64, open: f64 },

    #[error("low {low} is above close {close}")]
    LowAboveClose { low: f64, close: f64 },

    #[error("high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    #[error("volume is missing")]
    VolumeMissing,

    #[error("volume {volume} is negative")]
    VolumeNegative { volume: f64 },

    #[error("volume is zero")]
    VolumeZero,

    #[error("average volume is zero")]
    ZeroAverageVolume,

    #[error("missing fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("close moved {:.2}% from the previous record", .change * 100.0)]
    Outlier { change: f64 },

    #[error("{date} is not a trading day: {reason}")]
    NonTradingDay { date: NaiveDate, reason: String },

    #[error("price standard deviation {std_dev:.4} exceeds mean {mean:.4}")]
    HighVolatility { std_dev: f64, mean: f64 },

    #[error("volume coefficient of variation {cv:.2} exceeds {}", MAX_VOLUME_CV)]
    VolumeDispersion { cv: f64 },

    #[error("no asset profile registered for {symbol}")]
    NoProfile { symbol: String },
}

/// An issue tied to a batch position, when there is one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub index: Option<usize>,
    pub kind: IssueKind,
}

impl ValidationIssue {
    pub fn at(index: usize, kind: IssueKind) -> Self {
        Self {
            index: Some(index),
            kind,
        }
    }

    pub fn batch(kind: IssueKind) -> Self {
        Self { index: None, kind }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "row {i}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub symbol: String,
    pub is_valid: bool,
    pub record_count: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new(
        symbol: &str,
        record_count: usize,
        errors: Vec<ValidationIssue>,
        warnings: Vec<ValidationIssue>,
    ) -> Self {
        let valid_count = record_count.saturating_sub(errors.len());
        Self {
            symbol: symbol.to_string(),
            is_valid: errors.is_empty(),
            record_count,
            valid_count,
            invalid_count: record_count - valid_count,
            errors,
            warnings,
        }
    }
}

/// Checks the five OHLC relationships and price positivity. Missing fields
/// are skipped.
pub fn validate_ohlc<R: PriceRecord>(record: &R) -> Vec<IssueKind> {
    let f = record.fields();
    let mut errors = Vec::new();

    for (field, value) in [
        ("open", f.open),
        ("high", f.high),
        ("low", f.low),
        ("close", f.close),
    ] {
        if let Some(v) = value {
            if v <= 0.0 {
                errors.push(IssueKind::NonPositivePrice { field, value: v });
            }
        }
    }

    if let (Some(high), Some(open)) = (f.high, f.open) {
        if high < open {
            errors.push(IssueKind::HighBelowOpen { high, open });
        }
    }
    if let (Some(high), Some(close)) = (f.high, f.close) {
        if high < close {
            errors.push(IssueKind::HighBelowClose { high, close });
        }
    }
    if let (Some(low), Some(open)) = (f.low, f.open) {
        if low > open {
            errors.push(IssueKind::LowAboveOpen { low, open });
        }
    }
    if let (Some(low), Some(close)) = (f.low, f.close) {
        if low > close {
            errors.push(IssueKind::LowAboveClose { low, close });
        }
    }
    if let (Some(high), Some(low)) = (f.high, f.low) {
        if high < low {
            errors.push(IssueKind::HighBelowLow { high, low });
        }
    }

    errors
}

/// Relative change `cur / prev - 1`, or `None` when either side is missing
/// or the previous value can't be divided by.
pub fn pct_change(prev: Option<f64>, cur: Option<f64>) -> Option<f64> {
    match (prev, cur) {
        (Some(p), Some(c)) if p > 0.0 => Some(c / p - 1.0),
        _ => None,
    }
}

/// Flags index `i` when `|close[i] / close[i-1] - 1| > threshold`. The first
/// element is never flagged.
pub fn detect_outliers(closes: &[f64], threshold: f64) -> Vec<bool> {
    let series: Vec<Option<f64>> = closes.iter().map(|c| Some(*c)).collect();
    detect_outliers_in(&series, threshold)
}

/// Same rule over a series with gaps; a gap on either side never flags.
pub fn detect_outliers_in(closes: &[Option<f64>], threshold: f64) -> Vec<bool> {
    (0..closes.len())
        .map(|i| {
            i > 0
                && pct_change(closes[i - 1], closes[i])
                    .map(|change| change.abs() > threshold)
                    .unwrap_or(false)
        })
        .collect()
}

fn closes<R: PriceRecord>(batch: &[R]) -> Vec<Option<f64>> {
    batch.iter().map(|r| r.fields().close).collect()
}

pub fn validate_volume<R: PriceRecord>(batch: &[R]) -> Vec<ValidationIssue> {
    batch
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let kind = match record.fields().volume {
                None => IssueKind::VolumeMissing,
                Some(v) if v < 0.0 => IssueKind::VolumeNegative { volume: v },
                Some(v) if v == 0.0 => IssueKind::VolumeZero,
                Some(_) => return None,
            };
            Some(ValidationIssue::at(i, kind))
        })
        .collect()
}

pub fn is_trading_day(date: NaiveDate, calendar: &TradingCalendar) -> bool {
    calendar.is_trading_day(date)
}

/// Every record whose market-local date the calendar marks as closed.
pub fn validate_trading_day_alignment<R: PriceRecord>(
    batch: &[R],
    calendar: &TradingCalendar,
) -> Vec<(NaiveDate, NonTradingReason)> {
    batch
        .iter()
        .filter_map(|record| {
            let date = record.timestamp().trading_date(calendar.timezone());
            calendar
                .non_trading_reason(date)
                .map(|reason| (date, reason))
        })
        .collect()
}

/// Batch-level validation with a configurable outlier threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Validator {
    pub outlier_threshold: f64,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

impl Validator {
    pub fn new(outlier_threshold: f64) -> Self {
        Self { outlier_threshold }
    }

    /// Row-wise OHLC errors and missing-value warnings, then batch-wise
    /// volume errors and outlier warnings.
    pub fn validate_batch<R: PriceRecord>(&self, batch: &[R], symbol: &str) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (i, record) in batch.iter().enumerate() {
            errors.extend(
                validate_ohlc(record)
                    .into_iter()
                    .map(|kind| ValidationIssue::at(i, kind)),
            );
            let missing = record.fields().missing();
            if !missing.is_empty() {
                warnings.push(ValidationIssue::at(
                    i,
                    IssueKind::MissingFields { fields: missing },
                ));
            }
        }

        errors.extend(validate_volume(batch));

        let series = closes(batch);
        for (i, flagged) in detect_outliers_in(&series, self.outlier_threshold)
            .into_iter()
            .enumerate()
        {
            if flagged {
                if let Some(change) = pct_change(series[i - 1], series[i]) {
                    warnings.push(ValidationIssue::at(i, IssueKind::Outlier { change }));
                }
            }
        }

        let result = ValidationResult::new(symbol, batch.len(), errors, warnings);
        tracing::debug!(
            symbol,
            records = result.record_count,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validated batch"
        );
        result
    }

    /// Plausibility of a batch against the symbol's asset profile and its own
    /// price/volume statistics.
    pub fn validate_against_profile<R: PriceRecord>(
        &self,
        batch: &[R],
        symbol: &str,
        registry: &AssetRegistry,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if registry.get(symbol).is_none() {
            warnings.push(ValidationIssue::batch(IssueKind::NoProfile {
                symbol: symbol.to_string(),
            }));
        }

        let prices: Vec<f64> = batch.iter().filter_map(|r| r.fields().close).collect();
        if let (Some(m), Some(sd)) = (mean(&prices), sample_std(&prices)) {
            if sd > m {
                warnings.push(ValidationIssue::batch(IssueKind::HighVolatility {
                    std_dev: sd,
                    mean: m,
                }));
            }
        }

        let volumes: Vec<f64> = batch.iter().filter_map(|r| r.fields().volume).collect();
        if let Some(avg) = mean(&volumes) {
            if avg == 0.0 {
                errors.push(ValidationIssue::batch(IssueKind::ZeroAverageVolume));
            } else if let Some(sd) = sample_std(&volumes) {
                let cv = sd / avg;
                if cv > MAX_VOLUME_CV {
                    warnings.push(ValidationIssue::batch(IssueKind::VolumeDispersion { cv }));
                }
            }
        }

        ValidationResult::new(symbol, batch.len(), errors, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset_profile::AssetProfile;
    use crate::domain::records::RawPriceData;
    use chrono_tz::Asia::Hong_Kong;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(day: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> RawPriceData {
        RawPriceData::new("0700.HK", date(2025, 1, day), "test")
            .with_ohlcv(open, high, low, close, volume)
    }

    #[test]
    fn valid_record_has_no_ohlc_errors() {
        assert!(validate_ohlc(&bar(6, 100.0, 105.0, 95.0, 102.0, 1_000.0)).is_empty());
    }

    #[test]
    fn broken_envelope_reports_each_violation() {
        // high below everything, low above everything
        let errors = validate_ohlc(&bar(6, 100.0, 90.0, 110.0, 100.0, 1_000.0));
        assert!(errors.contains(&IssueKind::HighBelowOpen {
            high: 90.0,
            open: 100.0
        }));
        assert!(errors.contains(&IssueKind::HighBelowClose {
            high: 90.0,
            close: 100.0
        }));
        assert!(errors.contains(&IssueKind::LowAboveOpen {
            low: 110.0,
            open: 100.0
        }));
        assert!(errors.contains(&IssueKind::LowAboveClose {
            low: 110.0,
            close: 100.0
        }));
        assert!(errors.contains(&IssueKind::HighBelowLow {
            high: 90.0,
            low: 110.0
        }));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn missing_fields_are_skipped_by_ohlc_check() {
        let mut record = RawPriceData::new("X", date(2025, 1, 6), "test");
        record.high = Some(10.0);
        record.close = Some(12.0);
        let errors = validate_ohlc(&record);
        assert_eq!(
            errors,
            vec![IssueKind::HighBelowClose {
                high: 10.0,
                close: 12.0
            }]
        );
    }

    #[test]
    fn non_positive_price_is_an_error() {
        let errors = validate_ohlc(&bar(6, -1.0, 10.0, 0.5, 5.0, 1.0));
        assert!(errors.contains(&IssueKind::NonPositivePrice {
            field: "open",
            value: -1.0
        }));
    }

    #[test]
    fn outlier_rule_matches_reference_series() {
        let flags = detect_outliers(&[100.0, 101.0, 130.0, 129.0], 0.20);
        assert_eq!(flags, vec![false, false, true, false]);
    }

    #[test]
    fn outlier_edge_cases() {
        assert!(detect_outliers(&[], 0.2).is_empty());
        assert_eq!(detect_outliers(&[100.0], 0.2), vec![false]);
        assert_eq!(
            detect_outliers_in(&[Some(100.0), None, Some(200.0)], 0.2),
            vec![false, false, false]
        );
        // a drop counts as well
        assert_eq!(detect_outliers(&[100.0, 70.0], 0.2), vec![false, true]);
    }

    #[test]
    fn volume_checks() {
        let mut missing = bar(6, 1.0, 1.0, 1.0, 1.0, 0.0);
        missing.volume = None;
        let mut nan = bar(7, 1.0, 1.0, 1.0, 1.0, 0.0);
        nan.volume = Some(f64::NAN);
        let batch = vec![
            bar(2, 1.0, 1.0, 1.0, 1.0, 10.0),
            bar(3, 1.0, 1.0, 1.0, 1.0, -5.0),
            bar(6, 1.0, 1.0, 1.0, 1.0, 0.0),
            missing,
            nan,
        ];
        let issues = validate_volume(&batch);
        let kinds: Vec<_> = issues.iter().map(|i| (i.index, i.kind.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (Some(1), IssueKind::VolumeNegative { volume: -5.0 }),
                (Some(2), IssueKind::VolumeZero),
                (Some(3), IssueKind::VolumeMissing),
                (Some(4), IssueKind::VolumeMissing),
            ]
        );
    }

    #[test]
    fn validate_batch_counts_errors_and_warnings() {
        let mut gap = bar(8, 131.0, 132.0, 128.0, 129.0, 1_000.0);
        gap.open = None;
        let batch = vec![
            bar(2, 100.0, 101.0, 99.0, 100.0, 1_000.0),
            bar(3, 100.0, 102.0, 99.0, 101.0, 1_000.0),
            bar(6, 101.0, 131.0, 100.0, 130.0, 1_000.0),
            bar(7, 130.0, 129.0, 128.0, 130.0, -1.0),
            gap,
        ];
        let result = Validator::default().validate_batch(&batch, "0700.HK");

        assert_eq!(result.record_count, 5);
        // row 3: high below open + high below close + negative volume
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.valid_count, 2);
        assert_eq!(result.invalid_count, 3);
        assert!(!result.is_valid);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.index == Some(2) && matches!(w.kind, IssueKind::Outlier { .. }))
        );
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.index == Some(4) && matches!(w.kind, IssueKind::MissingFields { .. }))
        );
    }

    #[test]
    fn clean_batch_is_valid() {
        let batch = vec![
            bar(2, 100.0, 101.0, 99.0, 100.0, 1_000.0),
            bar(3, 100.0, 102.0, 99.0, 101.0, 1_200.0),
        ];
        let result = Validator::default().validate_batch(&batch, "0700.HK");
        assert!(result.is_valid);
        assert_eq!(result.valid_count, 2);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn trading_day_checks() {
        let cal = TradingCalendar::new("HK", Hong_Kong).with_holidays([date(2025, 1, 1)]);
        assert!(!is_trading_day(date(2025, 1, 4), &cal));
        assert!(is_trading_day(date(2025, 1, 6), &cal));

        let batch = vec![
            bar(1, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(2, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(4, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        let misaligned = validate_trading_day_alignment(&batch, &cal);
        assert_eq!(
            misaligned,
            vec![
                (date(2025, 1, 1), NonTradingReason::Holiday),
                (
                    date(2025, 1, 4),
                    NonTradingReason::Weekend(chrono::Weekday::Sat)
                ),
            ]
        );
    }

    #[test]
    fn profile_validation_warns_without_profile() {
        let batch = vec![bar(2, 1.0, 1.0, 1.0, 1.0, 10.0)];
        let result =
            Validator::default().validate_against_profile(&batch, "UNKNOWN", &AssetRegistry::empty());
        assert!(result.is_valid);
        assert_eq!(
            result.warnings[0].kind,
            IssueKind::NoProfile {
                symbol: "UNKNOWN".into()
            }
        );
    }

    #[test]
    fn profile_validation_flags_zero_volume_and_dispersion() {
        let registry = AssetRegistry::with_defaults();
        let zero = vec![
            bar(2, 10.0, 10.0, 10.0, 10.0, 0.0),
            bar(3, 10.0, 10.0, 10.0, 10.0, 0.0),
        ];
        let result = Validator::default().validate_against_profile(&zero, "0700.HK", &registry);
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].kind, IssueKind::ZeroAverageVolume);

        let spiky = vec![
            bar(2, 10.0, 10.0, 10.0, 10.0, 1.0),
            bar(3, 10.0, 10.0, 10.0, 10.0, 1.0),
            bar(6, 10.0, 10.0, 10.0, 10.0, 1.0),
            bar(7, 10.0, 10.0, 10.0, 10.0, 1_000.0),
        ];
        let result = Validator::default().validate_against_profile(&spiky, "0700.HK", &registry);
        assert!(result.is_valid);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| matches!(w.kind, IssueKind::VolumeDispersion { .. }))
        );
    }

    #[test]
    fn profile_validation_flags_volatile_prices() {
        let mut registry = AssetRegistry::empty();
        registry
            .register(AssetProfile::new("PENNY", "US", "USD", 1.0, 1, None, 0.0, 0.0, 0.0).unwrap())
            .unwrap();
        let batch = vec![
            bar(2, 0.1, 0.1, 0.1, 0.1, 10.0),
            bar(3, 0.1, 0.1, 0.1, 0.1, 10.0),
            bar(6, 50.0, 50.0, 50.0, 50.0, 10.0),
        ];
        let result = Validator::default().validate_against_profile(&batch, "PENNY", &registry);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| matches!(w.kind, IssueKind::HighVolatility { .. }))
        );
    }
}
