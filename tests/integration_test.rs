//! End-to-end tests over the in-memory SQLite store.
//!
//! Tests cover:
//! - The 100 business-day `0700.HK` load scenario (count, quality, cache counters)
//! - insert_batch / get_range round trip
//! - Cleaning idempotence through the orchestrator
//! - Duplicate inserts surfacing as storage errors
//! - Cache eviction once at capacity
//! - Trading-day checks against the HK calendar
//! - CSV import through the pipeline

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use pricevault::adapters::csv_adapter::CsvRawSource;
use pricevault::domain::asset_profile::AssetRegistry;
use pricevault::domain::error::PriceVaultError;
use pricevault::domain::pipeline::PipelineOrchestrator;
use pricevault::domain::validator::{detect_outliers, is_trading_day};
use pricevault::ports::data_port::RawDataSource;
use pricevault::ports::storage_port::{NewPriceRecord, PriceRepository};
use std::sync::Arc;

mod load_scenario {
    use super::*;

    #[test]
    fn hundred_business_days_of_tencent() {
        let dm = manager_with_cache(16);
        let days = business_days(date(2025, 1, 2), 100);
        let batch: Vec<RawPriceData> = days
            .iter()
            .enumerate()
            .map(|(i, d)| raw("0700.HK", *d, 380.0 + (i % 5) as f64 * 0.5))
            .collect();

        let report = dm.ingest("0700.HK", &batch, "test").unwrap();
        assert_eq!(report.inserted, 100);
        assert_eq!(dm.repository().count("0700.HK").unwrap(), 100);

        let (start, end) = dm.repository().date_range("0700.HK").unwrap().unwrap();
        let before = dm.get_cache_stats().unwrap();

        let bars = dm.load_data("0700.HK", start, end, false).unwrap().unwrap();
        assert_eq!(bars.len(), 100);
        let mean = bars.iter().map(|b| b.quality_score.unwrap()).sum::<f64>() / bars.len() as f64;
        assert_abs_diff_eq!(mean, 1.0, epsilon = 0.05);
        assert!(bars.windows(2).all(|w| w[0].bar.date < w[1].bar.date));

        let after_first = dm.get_cache_stats().unwrap();
        assert_eq!(after_first.misses, before.misses + 1);

        let again = dm.load_data("0700.HK", start, end, false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&bars, &again));
        let after_second = dm.get_cache_stats().unwrap();
        assert_eq!(after_second.hits, after_first.hits + 1);
        assert_eq!(after_second.misses, after_first.misses);
    }

    #[test]
    fn pipeline_reload_keeps_every_row() {
        let dm = manager_with_cache(16);
        let days = business_days(date(2025, 3, 3), 30);
        let batch: Vec<RawPriceData> = days.iter().map(|d| raw("0700.HK", *d, 400.0)).collect();
        dm.ingest("0700.HK", &batch, "test").unwrap();

        let (start, end) = dm.repository().date_range("0700.HK").unwrap().unwrap();
        let bars = dm.load_data("0700.HK", start, end, true).unwrap().unwrap();
        assert_eq!(bars.len(), 30);
        for bar in bars.iter() {
            assert_abs_diff_eq!(bar.quality_score.unwrap(), 1.0, epsilon = 1e-9);
        }
        assert!(bars.iter().all(|b| b.is_outlier == Some(false)));
    }
}

mod reload_after_save {
    use super::*;

    #[test]
    fn pipeline_load_rescores_rows_saved_without_scores() {
        let dm = manager_with_cache(16);
        let bars: Vec<ScoredBar> = (6..=8)
            .map(|d| scored_bar("0700.HK", utc(2025, 1, d), 380.0 + f64::from(d)))
            .collect();
        dm.save_data("0700.HK", &bars, "test").unwrap();

        let cleaned = dm
            .load_data("0700.HK", utc(2025, 1, 6), utc(2025, 1, 8), true)
            .unwrap()
            .unwrap();
        assert_eq!(cleaned.len(), 3);
        assert!(cleaned.iter().all(|b| b.quality_score.is_some()));

        let stored = dm
            .load_data("0700.HK", utc(2025, 1, 6), utc(2025, 1, 8), false)
            .unwrap()
            .unwrap();
        assert!(stored.iter().all(|b| b.quality_score.is_none()));
    }
}

mod intraday {
    use super::*;
    use chrono::Duration;

    #[test]
    fn bars_within_one_second_are_kept_apart() {
        let dm = manager_with_cache(4);
        let open = utc(2025, 1, 6) + Duration::minutes(90);
        let bars = vec![
            scored_bar("0700.HK", open, 380.0),
            scored_bar("0700.HK", open + Duration::milliseconds(500), 380.5),
        ];
        assert_eq!(dm.save_data("0700.HK", &bars, "tick").unwrap(), 2);

        let rows = dm.repository().get_range("0700.HK", open, open + Duration::seconds(1)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].date, open + Duration::milliseconds(500));
        assert_eq!(rows[1].close, 380.5);
    }
}

mod storage {
    use super::*;

    #[test]
    fn insert_batch_round_trips_through_get_range() {
        let repo = memory_repo();
        let records: Vec<NewPriceRecord> = (1..=10)
            .map(|d| {
                NewPriceRecord::from_scored(
                    &scored_bar("BHP.AX", utc(2025, 2, d), 40.0 + f64::from(d)),
                    "test",
                )
            })
            .collect();
        assert_eq!(repo.insert_batch(&records).unwrap(), 10);

        let rows = repo
            .get_range("BHP.AX", utc(2025, 2, 1), utc(2025, 2, 10))
            .unwrap();
        assert_eq!(rows.len(), records.len());
        for (row, record) in rows.iter().zip(&records) {
            assert_eq!(row.date, record.date);
            assert_eq!(
                (row.open, row.high, row.low, row.close, row.volume),
                (record.open, record.high, record.low, record.close, record.volume)
            );
        }
    }

    #[test]
    fn duplicate_save_is_a_storage_error() {
        let dm = manager_with_cache(4);
        let bar = scored_bar("0700.HK", utc(2025, 1, 6), 380.0);
        dm.save_data("0700.HK", std::slice::from_ref(&bar), "test").unwrap();

        let err = dm.save_data("0700.HK", &[bar], "test").unwrap_err();
        assert!(matches!(err, PriceVaultError::DuplicateRecord { .. }));
        assert!(err.is_storage());
        assert_eq!(dm.repository().count("0700.HK").unwrap(), 1);
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let repo = memory_repo();
        let bar = scored_bar("0700.HK", utc(2025, 1, 6), 380.0);
        let first = NewPriceRecord::from_scored(&bar, "test");
        repo.insert(&first).unwrap();

        let batch = vec![
            NewPriceRecord::from_scored(&scored_bar("0700.HK", utc(2025, 1, 7), 381.0), "test"),
            first,
        ];
        assert!(repo.insert_batch(&batch).is_err());
        assert_eq!(repo.count("0700.HK").unwrap(), 1);
    }
}

mod cleaning {
    use super::*;

    #[test]
    fn outlier_rule_on_reference_closes() {
        assert_eq!(
            detect_outliers(&[100.0, 101.0, 130.0, 129.0], 0.20),
            vec![false, false, true, false]
        );
    }

    #[test]
    fn clean_and_validate_is_idempotent() {
        let pipeline =
            PipelineOrchestrator::new(Arc::new(AssetRegistry::with_defaults()), hk_calendar());
        let days = business_days(date(2025, 1, 6), 6);
        let closes = [100.0, 101.0, 130.0, 129.0, 128.0, 127.5];
        let mut batch: Vec<RawPriceData> = days
            .iter()
            .zip(closes)
            .map(|(d, c)| raw("0700.HK", *d, c))
            .collect();
        batch[4].volume = None;

        let (first, _) = pipeline.clean_and_validate(&batch, "0700.HK");
        let replay: Vec<RawPriceData> = first.iter().map(RawPriceData::from).collect();
        let (second, validation) = pipeline.clean_and_validate(&replay, "0700.HK");

        assert!(validation.is_valid);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.is_outlier, b.is_outlier);
            assert_abs_diff_eq!(a.quality_score, b.quality_score, epsilon = 1e-12);
        }
        assert!(first[2].is_outlier);
    }
}

mod smoothing {
    use super::*;
    use pricevault::domain::cleaning::{CleaningEngine, MissingDataStrategy, OutlierStrategy};

    #[test]
    fn smoothed_spike_replays_to_the_same_flags_and_scores() {
        let pipeline = PipelineOrchestrator::with_engine(
            Arc::new(AssetRegistry::with_defaults()),
            hk_calendar(),
            CleaningEngine::new(MissingDataStrategy::ForwardFill, OutlierStrategy::Smooth, 0.20, 20),
        );
        let batch: Vec<RawPriceData> = business_days(date(2025, 1, 6), 4)
            .iter()
            .zip([100.0, 100.0, 160.0, 100.0])
            .map(|(d, c)| raw("0700.HK", *d, c))
            .collect();

        let (first, _) = pipeline.clean_and_validate(&batch, "0700.HK");
        let closes: Vec<f64> = first.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![100.0, 100.0, 120.0, 100.0]);

        let replay: Vec<RawPriceData> = first.iter().map(RawPriceData::from).collect();
        let (second, _) = pipeline.clean_and_validate(&replay, "0700.HK");
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.is_outlier, b.is_outlier);
            assert_abs_diff_eq!(a.quality_score, b.quality_score, epsilon = 1e-12);
        }
    }
}

mod cache {
    use super::*;

    #[test]
    fn one_eviction_per_load_at_capacity() {
        let dm = manager_with_cache(2);
        let bars: Vec<ScoredBar> = (6..=10)
            .map(|d| scored_bar("0700.HK", utc(2025, 1, d), 380.0))
            .collect();
        dm.update_data("0700.HK", &bars, "test").unwrap();

        for end in 7..=10 {
            dm.load_data("0700.HK", utc(2025, 1, 6), utc(2025, 1, end), false)
                .unwrap()
                .unwrap();
            let stats = dm.get_cache_stats().unwrap();
            assert!(stats.size <= 2);
            assert_eq!(stats.evictions, (end - 7).saturating_sub(1) as u64);
        }
    }
}

mod calendar {
    use super::*;

    #[test]
    fn weekend_and_monday() {
        let cal = hk_calendar();
        assert!(!is_trading_day(date(2025, 1, 4), &cal));
        assert!(is_trading_day(date(2025, 1, 6), &cal));
    }

    #[test]
    fn holiday_rows_are_warnings_not_errors() {
        let pipeline =
            PipelineOrchestrator::new(Arc::new(AssetRegistry::with_defaults()), hk_calendar());
        let batch: Vec<RawPriceData> = [date(2024, 12, 31), date(2025, 1, 1), date(2025, 1, 2)]
            .iter()
            .map(|d| raw("0700.HK", *d, 380.0))
            .collect();
        let outcome = pipeline.process(&batch, "0700.HK");
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.report.calendar_warnings.len(), 1);
        assert!(!outcome.records[1].is_trading_day);
        assert!(outcome.report.final_validation.is_valid);
    }
}

mod csv_import {
    use super::*;
    use std::fs;

    #[test]
    fn csv_with_gaps_is_filled_and_stored() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("0700.HK.csv"),
            "date,open,high,low,close,volume\n\
             2025-01-06,380.0,385.0,378.0,383.0,1000000\n\
             2025-01-07,383.0,386.0,381.0,,1100000\n\
             2025-01-08,384.5,390.0,384.0,389.0,\n\
             2025-01-08,384.5,390.0,384.0,388.0,1200000\n",
        )
        .unwrap();

        let source = CsvRawSource::new(dir.path().to_path_buf());
        let raw = source.fetch("0700.HK").unwrap();
        assert_eq!(raw.len(), 4);

        let dm = manager_with_cache(4);
        let report = dm.ingest("0700.HK", &raw, source.source_name()).unwrap();
        assert_eq!(report.pipeline.duplicates_removed, 1);
        assert_eq!(report.inserted, 3);

        let rows = dm.repository().get_all("0700.HK", None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].close, 388.0);
        assert_eq!(rows[1].close, 383.0);
        assert!(rows.iter().all(|r| r.source == "csv"));
    }
}
