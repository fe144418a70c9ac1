//! Typed settings read and validated from the INI sections.
//!
//! Storage sections are read by the adapters themselves; everything the
//! domain needs is checked here before anything is built.

use crate::domain::cache::{DEFAULT_MAX_SIZE, DEFAULT_TTL_SECONDS, RangeCache};
use crate::domain::calendar::TradingCalendar;
use crate::domain::cleaning::{
    CleaningEngine, DEFAULT_ROLLING_WINDOW, MissingDataStrategy, OutlierStrategy,
};
use crate::domain::error::{PriceVaultError, ValidationError};
use crate::domain::validator::DEFAULT_OUTLIER_THRESHOLD;
use crate::logging::LogConfig;
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use std::time::Duration;

pub const DEFAULT_MARKET: &str = "HK";
pub const DEFAULT_TIMEZONE: &str = "Asia/Hong_Kong";

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_MAX_SIZE,
            ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
        }
    }
}

impl CacheSettings {
    /// `None` when caching is disabled.
    pub fn build(&self) -> Option<RangeCache> {
        self.enabled
            .then(|| RangeCache::new(self.max_size, self.ttl))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub enabled: bool,
    pub engine: CleaningEngine,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: CleaningEngine::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub cache: CacheSettings,
    pub pipeline: PipelineSettings,
    pub calendar: TradingCalendar,
    pub logging: LogConfig,
}

impl Settings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PriceVaultError> {
        Ok(Self {
            cache: cache_settings(config)?,
            pipeline: pipeline_settings(config)?,
            calendar: calendar(config)?,
            logging: LogConfig::from_config(config)?,
        })
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PriceVaultError {
    PriceVaultError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn from_validation(section: &str, e: ValidationError) -> PriceVaultError {
    invalid(section, &e.field, e.reason)
}

pub fn cache_settings(config: &dyn ConfigPort) -> Result<CacheSettings, PriceVaultError> {
    let enabled = config.get_bool("cache", "enabled", true);

    let max_size = config.get_int("cache", "max_size", DEFAULT_MAX_SIZE as i64);
    if max_size < 0 {
        return Err(invalid("cache", "max_size", "max_size must be non-negative"));
    }

    let ttl_seconds = config.get_int("cache", "ttl_seconds", DEFAULT_TTL_SECONDS as i64);
    if ttl_seconds <= 0 {
        return Err(invalid("cache", "ttl_seconds", "ttl_seconds must be positive"));
    }

    Ok(CacheSettings {
        enabled,
        max_size: max_size as usize,
        ttl: Duration::from_secs(ttl_seconds as u64),
    })
}

pub fn pipeline_settings(config: &dyn ConfigPort) -> Result<PipelineSettings, PriceVaultError> {
    let enabled = config.get_bool("pipeline", "enabled", true);

    let threshold = config.get_double("pipeline", "outlier_threshold", DEFAULT_OUTLIER_THRESHOLD);
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(invalid(
            "pipeline",
            "outlier_threshold",
            "outlier_threshold must be a positive fraction",
        ));
    }

    let window = config.get_int("pipeline", "rolling_window", DEFAULT_ROLLING_WINDOW as i64);
    if window < 2 {
        return Err(invalid(
            "pipeline",
            "rolling_window",
            "rolling_window must be at least 2",
        ));
    }

    let missing: MissingDataStrategy = match config.get_string("pipeline", "missing_strategy") {
        Some(s) => s.parse().map_err(|e| from_validation("pipeline", e))?,
        None => MissingDataStrategy::default(),
    };
    let outlier: OutlierStrategy = match config.get_string("pipeline", "outlier_strategy") {
        Some(s) => s.parse().map_err(|e| from_validation("pipeline", e))?,
        None => OutlierStrategy::default(),
    };

    Ok(PipelineSettings {
        enabled,
        engine: CleaningEngine::new(missing, outlier, threshold, window as usize),
    })
}

pub fn calendar(config: &dyn ConfigPort) -> Result<TradingCalendar, PriceVaultError> {
    let market = config
        .get_string("calendar", "market")
        .unwrap_or_else(|| DEFAULT_MARKET.to_string());

    let tz_name = config
        .get_string("calendar", "timezone")
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    let tz: Tz = tz_name
        .trim()
        .parse()
        .map_err(|e| invalid("calendar", "timezone", format!("{tz_name}: {e}")))?;

    let holidays = match config.get_string("calendar", "holidays") {
        Some(list) => parse_holidays(&list)?,
        None => Vec::new(),
    };

    let mut calendar = TradingCalendar::new(market, tz).with_holidays(holidays);

    let open = config.get_string("calendar", "session_open");
    let close = config.get_string("calendar", "session_close");
    match (open, close) {
        (Some(open), Some(close)) => {
            let open = parse_session_time(&open, "session_open")?;
            let close = parse_session_time(&close, "session_close")?;
            if open >= close {
                return Err(invalid(
                    "calendar",
                    "session_open",
                    "session_open must be before session_close",
                ));
            }
            calendar = calendar.with_session(open, close);
        }
        (None, None) => {}
        (Some(_), None) => return Err(missing("calendar", "session_close")),
        (None, Some(_)) => return Err(missing("calendar", "session_open")),
    }

    Ok(calendar)
}

fn missing(section: &str, key: &str) -> PriceVaultError {
    PriceVaultError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn parse_holidays(list: &str) -> Result<Vec<NaiveDate>, PriceVaultError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
                invalid(
                    "calendar",
                    "holidays",
                    format!("invalid date '{s}', expected YYYY-MM-DD"),
                )
            })
        })
        .collect()
}

fn parse_session_time(value: &str, key: &str) -> Result<NaiveTime, PriceVaultError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| invalid("calendar", key, format!("invalid time '{value}', expected HH:MM")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::logging::LogFormat;
    use chrono_tz::America::New_York;
    use chrono_tz::Asia::Hong_Kong;

    fn cfg(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn expect_invalid(result: Result<impl std::fmt::Debug, PriceVaultError>, want_key: &str) {
        match result {
            Err(PriceVaultError::ConfigInvalid { key, .. }) => assert_eq!(key, want_key),
            other => panic!("expected ConfigInvalid for {want_key}, got {other:?}"),
        }
    }

    #[test]
    fn defaults_without_any_section() {
        let settings = Settings::from_config(&FileConfigAdapter::empty()).unwrap();
        assert_eq!(settings.cache, CacheSettings::default());
        assert_eq!(settings.pipeline, PipelineSettings::default());
        assert_eq!(settings.calendar.market(), "HK");
        assert_eq!(settings.calendar.timezone(), Hong_Kong);
        assert!(settings.calendar.holidays().is_empty());
        assert_eq!(settings.logging, LogConfig::default());
    }

    #[test]
    fn full_config() {
        let settings = Settings::from_config(&cfg(
            "[cache]\nenabled = false\nmax_size = 4\nttl_seconds = 60\n\
             [pipeline]\noutlier_threshold = 0.1\nmissing_strategy = interpolate\n\
             outlier_strategy = clip\nrolling_window = 5\n\
             [calendar]\nmarket = US\ntimezone = America/New_York\n\
             holidays = 2025-01-01, 2025-07-04\nsession_open = 09:30\nsession_close = 16:00\n\
             [logging]\nformat = compact\n",
        ))
        .unwrap();

        assert!(!settings.cache.enabled);
        assert!(settings.cache.build().is_none());
        assert_eq!(settings.cache.ttl, Duration::from_secs(60));

        let engine = settings.pipeline.engine;
        assert_eq!(engine.missing_strategy, MissingDataStrategy::Interpolate);
        assert_eq!(engine.outlier_strategy, OutlierStrategy::Clip);
        assert_eq!(engine.outlier_threshold, 0.1);
        assert_eq!(engine.rolling_window, 5);

        let cal = settings.calendar;
        assert_eq!(cal.market(), "US");
        assert_eq!(cal.timezone(), New_York);
        assert_eq!(cal.holidays().len(), 2);
        assert!(cal.is_within_session(NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(!cal.is_within_session(NaiveTime::from_hms_opt(17, 0, 0).unwrap()));

        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn enabled_cache_builds() {
        let cache = cache_settings(&cfg("[cache]\nmax_size = 2\n"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cache.stats().max_size, 2);
    }

    #[test]
    fn negative_max_size() {
        expect_invalid(cache_settings(&cfg("[cache]\nmax_size = -1\n")), "max_size");
    }

    #[test]
    fn zero_ttl() {
        expect_invalid(cache_settings(&cfg("[cache]\nttl_seconds = 0\n")), "ttl_seconds");
    }

    #[test]
    fn non_positive_threshold() {
        expect_invalid(
            pipeline_settings(&cfg("[pipeline]\noutlier_threshold = 0\n")),
            "outlier_threshold",
        );
    }

    #[test]
    fn tiny_rolling_window() {
        expect_invalid(
            pipeline_settings(&cfg("[pipeline]\nrolling_window = 1\n")),
            "rolling_window",
        );
    }

    #[test]
    fn unknown_strategy_names_its_key() {
        expect_invalid(
            pipeline_settings(&cfg("[pipeline]\nmissing_strategy = guess\n")),
            "missing_strategy",
        );
        expect_invalid(
            pipeline_settings(&cfg("[pipeline]\noutlier_strategy = ignore\n")),
            "outlier_strategy",
        );
    }

    #[test]
    fn unknown_timezone() {
        expect_invalid(calendar(&cfg("[calendar]\ntimezone = Mars/Olympus\n")), "timezone");
    }

    #[test]
    fn bad_holiday() {
        expect_invalid(
            calendar(&cfg("[calendar]\nholidays = 2025-01-01, 01/29/2025\n")),
            "holidays",
        );
    }

    #[test]
    fn session_needs_both_ends() {
        match calendar(&cfg("[calendar]\nsession_open = 09:30\n")) {
            Err(PriceVaultError::ConfigMissing { key, .. }) => assert_eq!(key, "session_close"),
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn session_must_be_ordered() {
        expect_invalid(
            calendar(&cfg("[calendar]\nsession_open = 16:00\nsession_close = 09:30\n")),
            "session_open",
        );
        expect_invalid(
            calendar(&cfg("[calendar]\nsession_open = 9am\nsession_close = 16:00\n")),
            "session_open",
        );
    }
}
