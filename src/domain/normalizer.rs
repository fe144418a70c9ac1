//! Cleaned -> Normalized: UTC dates plus calendar annotations.

use crate::domain::calendar::TradingCalendar;
use crate::domain::records::{CleanedPriceData, NormalizedPriceData, RawTimestamp};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    calendar: TradingCalendar,
}

/// Normalized records plus the timestamps that could not be placed in UTC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<NormalizedPriceData>,
    pub unresolved: Vec<RawTimestamp>,
}

impl Normalizer {
    /// Naive timestamps are read in the calendar's timezone.
    pub fn new(calendar: TradingCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn normalize(&self, batch: Vec<CleanedPriceData>) -> Normalized {
        let tz = self.calendar.timezone();
        let mut out = Normalized::default();

        for record in batch {
            let Some(date) = record.date.to_utc(tz) else {
                warn!(
                    symbol = %record.symbol,
                    timestamp = %record.date.sort_key(),
                    timezone = %tz,
                    "local time does not exist in market timezone, dropping record"
                );
                out.unresolved.push(record.date);
                continue;
            };
            let original_timezone = match record.date {
                RawTimestamp::Naive(_) => tz.name().to_string(),
                RawTimestamp::Aware(dt) => dt.offset().to_string(),
            };
            let is_trading_day = self
                .calendar
                .is_trading_day(record.date.trading_date(tz));
            let trading_hours_aligned = self
                .calendar
                .is_within_session(record.date.market_time(tz));

            out.records.push(NormalizedPriceData {
                date,
                symbol: record.symbol,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                volume: record.volume,
                source: record.source,
                is_outlier: record.is_outlier,
                quality_score: record.quality_score,
                is_trading_day,
                trading_hours_aligned,
                original_timezone,
            });
        }
        out
    }
}
