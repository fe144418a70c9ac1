#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc, Weekday, Datelike};
use chrono_tz::Asia::Hong_Kong;
use pricevault::adapters::sqlite_adapter::SqliteRepository;
use pricevault::domain::asset_profile::AssetRegistry;
use pricevault::domain::cache::RangeCache;
use pricevault::domain::calendar::TradingCalendar;
use pricevault::domain::data_manager::DataManager;
pub use pricevault::domain::ohlcv::{OhlcvBar, ScoredBar};
use pricevault::domain::pipeline::PipelineOrchestrator;
pub use pricevault::domain::records::RawPriceData;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// `n` consecutive Monday-to-Friday dates starting at `start`.
pub fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    start
        .iter_days()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .take(n)
        .collect()
}

pub fn scored_bar(symbol: &str, date: DateTime<Utc>, close: f64) -> ScoredBar {
    ScoredBar {
        bar: OhlcvBar::new(symbol, date, close, close + 1.0, close - 1.0, close, 1_000_000)
            .unwrap(),
        quality_score: None,
        is_outlier: None,
    }
}

pub fn raw(symbol: &str, date: NaiveDate, close: f64) -> RawPriceData {
    RawPriceData::new(symbol, date, "test").with_ohlcv(
        close,
        close + 1.0,
        close - 1.0,
        close,
        1_000_000.0,
    )
}

pub fn hk_calendar() -> TradingCalendar {
    TradingCalendar::new("HK", Hong_Kong).with_holidays([date(2025, 1, 1), date(2025, 1, 29)])
}

pub fn memory_repo() -> SqliteRepository {
    let repo = SqliteRepository::in_memory().unwrap();
    repo.initialize_schema().unwrap();
    repo
}

pub fn manager_with_cache(max_size: usize) -> DataManager {
    let pipeline = PipelineOrchestrator::new(Arc::new(AssetRegistry::with_defaults()), hk_calendar());
    DataManager::new(
        Arc::new(memory_repo()),
        Some(RangeCache::new(max_size, Duration::from_secs(3600))),
        Some(pipeline),
    )
}

pub fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
