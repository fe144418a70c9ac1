//! Trading calendar: weekends, market holidays and session hours.
//!
//! The calendar is built from configuration and handed to the validator and
//! normalizer; nothing in the crate assumes a particular market.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonTradingReason {
    Weekend(Weekday),
    Holiday,
}

impl fmt::Display for NonTradingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonTradingReason::Weekend(day) => write!(f, "weekend ({day})"),
            NonTradingReason::Holiday => write!(f, "market holiday"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingCalendar {
    market: String,
    timezone: Tz,
    holidays: BTreeSet<NaiveDate>,
    session: Option<(NaiveTime, NaiveTime)>,
}

impl TradingCalendar {
    /// Monday to Friday, no holidays, no session window.
    pub fn new(market: impl Into<String>, timezone: Tz) -> Self {
        Self {
            market: market.into(),
            timezone,
            holidays: BTreeSet::new(),
            session: None,
        }
    }

    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, holidays: I) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn with_session(mut self, open: NaiveTime, close: NaiveTime) -> Self {
        self.session = Some((open, close));
        self
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }

    pub fn non_trading_reason(&self, date: NaiveDate) -> Option<NonTradingReason> {
        match date.weekday() {
            day @ (Weekday::Sat | Weekday::Sun) => Some(NonTradingReason::Weekend(day)),
            _ if self.holidays.contains(&date) => Some(NonTradingReason::Holiday),
            _ => None,
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.non_trading_reason(date).is_none()
    }

    /// Midnight stamps are daily bars and always align. Without a configured
    /// session every time aligns.
    pub fn is_within_session(&self, time: NaiveTime) -> bool {
        match self.session {
            _ if time == NaiveTime::MIN => true,
            None => true,
            Some((open, close)) => time >= open && time <= close,
        }
    }

    /// Trading days in `[start, end]`, inclusive.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }
}
