//! Raw batch -> normalized records, with a report of every stage.
//!
//! Order: sort and de-duplicate, validate, clean, validate again, normalize,
//! then calendar and asset-profile checks on the result. Validation never
//! stops the run; the report says what was found.

use crate::domain::asset_profile::AssetRegistry;
use crate::domain::calendar::TradingCalendar;
use crate::domain::cleaning::{CleaningEngine, CleaningReport};
use crate::domain::normalizer::Normalizer;
use crate::domain::records::{CleanedPriceData, NormalizedPriceData, RawPriceData};
use crate::domain::validator::{
    IssueKind, ValidationIssue, ValidationResult, Validator, validate_trading_day_alignment,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub symbol: String,
    pub input_count: usize,
    pub duplicates_removed: usize,
    pub initial_validation: ValidationResult,
    pub cleaning: CleaningReport,
    pub final_validation: ValidationResult,
    pub calendar_warnings: Vec<ValidationIssue>,
    pub unresolved_timestamps: usize,
    pub profile_validation: ValidationResult,
    pub output_count: usize,
}

impl PipelineReport {
    /// True when the cleaned batch and its profile checks raised no errors.
    pub fn is_valid(&self) -> bool {
        self.final_validation.is_valid && self.profile_validation.is_valid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub records: Vec<NormalizedPriceData>,
    pub report: PipelineReport,
}

#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    validator: Validator,
    engine: CleaningEngine,
    normalizer: Normalizer,
    registry: Arc<AssetRegistry>,
}

struct Cleaned {
    records: Vec<CleanedPriceData>,
    duplicates_removed: usize,
    initial: ValidationResult,
    cleaning: CleaningReport,
    revalidation: ValidationResult,
}

impl PipelineOrchestrator {
    pub fn new(registry: Arc<AssetRegistry>, calendar: TradingCalendar) -> Self {
        Self::with_engine(registry, calendar, CleaningEngine::default())
    }

    /// The validator shares the engine's outlier threshold.
    pub fn with_engine(
        registry: Arc<AssetRegistry>,
        calendar: TradingCalendar,
        engine: CleaningEngine,
    ) -> Self {
        Self {
            validator: Validator::new(engine.outlier_threshold),
            engine,
            normalizer: Normalizer::new(calendar),
            registry,
        }
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn calendar(&self) -> &TradingCalendar {
        self.normalizer.calendar()
    }

    pub fn engine(&self) -> &CleaningEngine {
        &self.engine
    }

    pub fn process(&self, raw: &[RawPriceData], symbol: &str) -> PipelineOutcome {
        let cleaned = self.clean_stages(raw, symbol);

        let calendar_warnings: Vec<ValidationIssue> =
            validate_trading_day_alignment(&cleaned.records, self.calendar())
                .into_iter()
                .map(|(date, reason)| {
                    ValidationIssue::batch(IssueKind::NonTradingDay {
                        date,
                        reason: reason.to_string(),
                    })
                })
                .collect();

        let normalized = self.normalizer.normalize(cleaned.records);
        let profile_validation =
            self.validator
                .validate_against_profile(&normalized.records, symbol, &self.registry);

        let report = PipelineReport {
            symbol: symbol.to_string(),
            input_count: raw.len(),
            duplicates_removed: cleaned.duplicates_removed,
            initial_validation: cleaned.initial,
            cleaning: cleaned.cleaning,
            final_validation: cleaned.revalidation,
            calendar_warnings,
            unresolved_timestamps: normalized.unresolved.len(),
            profile_validation,
            output_count: normalized.records.len(),
        };

        if !report.is_valid() {
            warn!(
                symbol,
                errors = report.final_validation.errors.len() + report.profile_validation.errors.len(),
                "pipeline output has validation errors"
            );
        }
        info!(
            symbol,
            input = report.input_count,
            output = report.output_count,
            non_trading = report.calendar_warnings.len(),
            "pipeline finished"
        );

        PipelineOutcome {
            records: normalized.records,
            report,
        }
    }

    /// Validate, clean, validate again. Returns the cleaned records and the
    /// second validation.
    pub fn clean_and_validate(
        &self,
        raw: &[RawPriceData],
        symbol: &str,
    ) -> (Vec<CleanedPriceData>, ValidationResult) {
        let cleaned = self.clean_stages(raw, symbol);
        (cleaned.records, cleaned.revalidation)
    }

    fn clean_stages(&self, raw: &[RawPriceData], symbol: &str) -> Cleaned {
        let (batch, duplicates_removed) = sort_and_dedupe(raw);
        let initial = self.validator.validate_batch(&batch, symbol);
        let (records, cleaning) = self.engine.clean_data(&batch, symbol);
        let revalidation = self.validator.validate_batch(&records, symbol);
        Cleaned {
            records,
            duplicates_removed,
            initial,
            cleaning,
            revalidation,
        }
    }
}

/// Ascending by timestamp; on equal timestamps the later record wins.
fn sort_and_dedupe(raw: &[RawPriceData]) -> (Vec<RawPriceData>, usize) {
    let mut batch = raw.to_vec();
    batch.sort_by_key(|r| r.date.sort_key());
    let before = batch.len();
    let mut deduped: Vec<RawPriceData> = Vec::with_capacity(before);
    for record in batch {
        match deduped.last_mut() {
            Some(last) if last.date.sort_key() == record.date.sort_key() => *last = record,
            _ => deduped.push(record),
        }
    }
    let removed = before - deduped.len();
    (deduped, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cleaning::{MissingDataStrategy, OutlierStrategy};
    use chrono::{Days, NaiveDate};
    use chrono_tz::Asia::Hong_Kong;

    fn rec(date: NaiveDate, close: f64) -> RawPriceData {
        RawPriceData::new("0700.HK", date, "test")
            .with_ohlcv(close, close + 1.0, close - 1.0, close, 1_000_000.0)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::new(AssetRegistry::with_defaults()),
            TradingCalendar::new("HK", Hong_Kong).with_holidays([day(1)]),
        )
    }

    #[test]
    fn clean_batch_flows_through_unchanged() {
        let raw: Vec<RawPriceData> = [6, 7, 8, 9, 10]
            .into_iter()
            .map(|d| rec(day(d), 380.0 + f64::from(d)))
            .collect();
        let out = orchestrator().process(&raw, "0700.HK");
        assert_eq!(out.records.len(), 5);
        assert!(out.report.is_valid());
        assert!(out.report.calendar_warnings.is_empty());
        assert!(out.report.profile_validation.warnings.is_empty());
        assert!(out.records.iter().all(|r| r.is_trading_day));
        assert!(out.records.iter().all(|r| (r.quality_score - 1.0).abs() < 1e-12));
    }

    #[test]
    fn unsorted_duplicates_are_resolved() {
        let raw = vec![rec(day(7), 101.0), rec(day(6), 100.0), rec(day(7), 102.0)];
        let out = orchestrator().process(&raw, "0700.HK");
        assert_eq!(out.report.duplicates_removed, 1);
        assert_eq!(out.records.len(), 2);
        assert!(out.records[0].date < out.records[1].date);
        assert!((out.records[1].close - 102.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weekend_and_holiday_rows_warn() {
        let raw = vec![rec(day(1), 100.0), rec(day(2), 100.0), rec(day(4), 100.0)];
        let out = orchestrator().process(&raw, "0700.HK");
        assert_eq!(out.report.calendar_warnings.len(), 2);
        assert_eq!(out.records.iter().filter(|r| !r.is_trading_day).count(), 2);
        assert!(out.report.is_valid());
    }

    #[test]
    fn broken_envelope_is_reported_not_fatal() {
        let bad = RawPriceData::new("0700.HK", day(7), "test")
            .with_ohlcv(100.0, 99.0, 98.0, 100.0, 1_000.0);
        let raw = vec![rec(day(6), 100.0), bad, rec(day(8), 100.0)];
        let out = orchestrator().process(&raw, "0700.HK");
        assert_eq!(out.records.len(), 3);
        assert!(!out.report.initial_validation.is_valid);
        assert!(!out.report.is_valid());
    }

    #[test]
    fn unknown_symbol_gets_profile_warning() {
        let raw = vec![
            RawPriceData::new("ZZZ", day(6), "t").with_ohlcv(1.0, 1.0, 1.0, 1.0, 10.0),
        ];
        let out = orchestrator().process(&raw, "ZZZ");
        assert!(matches!(
            out.report.profile_validation.warnings[0].kind,
            IssueKind::NoProfile { .. }
        ));
    }

    #[test]
    fn clean_and_validate_is_idempotent() {
        let mut raw: Vec<RawPriceData> = (0..30u64)
            .map(|i| {
                let close = if i == 12 { 150.0 } else { 100.0 + i as f64 * 0.5 };
                rec(day(1) + Days::new(i), close)
            })
            .collect();
        raw[5].volume = None;
        raw[20].close = None;
        raw[25].close = Some(60.0);

        let flags = |v: &[CleanedPriceData]| {
            v.iter()
                .map(|c| (c.is_outlier, c.quality_score))
                .collect::<Vec<_>>()
        };
        for strategy in [
            OutlierStrategy::Flag,
            OutlierStrategy::Clip,
            OutlierStrategy::Smooth,
        ] {
            let pipeline = PipelineOrchestrator::with_engine(
                Arc::new(AssetRegistry::with_defaults()),
                TradingCalendar::new("HK", Hong_Kong),
                CleaningEngine::new(MissingDataStrategy::ForwardFill, strategy, 0.20, 20),
            );
            let (once, _) = pipeline.clean_and_validate(&raw, "0700.HK");
            let replay: Vec<RawPriceData> = once.iter().map(RawPriceData::from).collect();
            let (twice, result) = pipeline.clean_and_validate(&replay, "0700.HK");
            assert_eq!(flags(&once), flags(&twice), "strategy {strategy}");
            assert_eq!(result.record_count, 30);
        }
    }

    #[test]
    fn removal_engine_shrinks_output() {
        let engine = CleaningEngine::new(
            MissingDataStrategy::Drop,
            OutlierStrategy::Remove,
            0.20,
            20,
        );
        let pipeline = PipelineOrchestrator::with_engine(
            Arc::new(AssetRegistry::with_defaults()),
            TradingCalendar::new("HK", Hong_Kong),
            engine,
        );
        let raw = vec![rec(day(6), 100.0), rec(day(7), 130.0), rec(day(8), 128.0)];
        let out = pipeline.process(&raw, "0700.HK");
        assert_eq!(out.report.cleaning.outliers_removed, 1);
        assert_eq!(out.report.output_count, 2);
    }
}
