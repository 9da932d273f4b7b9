// =============================================================================
// Session Filter — NYSE regular trading hours
// =============================================================================
//
// Blocks trades outside regular market hours:
//   - NYSE: 9:30 AM - 4:00 PM Eastern Time
//   - US market holidays (static table)
//   - Half days close at 1:00 PM
//
// Strategies may carry their own tighter session windows; this is the
// engine-level safety net consulted by the risk manager. The calendar table
// is process-wide immutable data.
// =============================================================================

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

/// NYSE holidays (market closed all day).
const HOLIDAYS: &[(i32, u32, u32)] = &[
    (2026, 1, 1),   // New Year's Day
    (2026, 1, 19),  // MLK Day
    (2026, 2, 16),  // Presidents' Day
    (2026, 4, 3),   // Good Friday
    (2026, 5, 25),  // Memorial Day
    (2026, 7, 3),   // Independence Day (observed)
    (2026, 9, 7),   // Labor Day
    (2026, 11, 26), // Thanksgiving
    (2026, 12, 25), // Christmas
];

/// Early-close days (1:00 PM ET).
const EARLY_CLOSE_DAYS: &[(i32, u32, u32)] = &[
    (2026, 11, 27), // Day after Thanksgiving
    (2026, 12, 24), // Christmas Eve
];

fn market_open_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap()
}

fn market_close_time() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap()
}

fn early_close_time() -> NaiveTime {
    NaiveTime::from_hms_opt(13, 0, 0).unwrap()
}

/// Filter for NYSE regular trading hours with holiday and early-close
/// awareness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter;

impl SessionFilter {
    pub fn new() -> Self {
        Self
    }

    /// Whether the market is open for regular trading right now.
    pub fn is_market_hours(&self) -> bool {
        self.is_market_hours_at(Utc::now())
    }

    /// Whether `now` falls within regular trading hours.
    pub fn is_market_hours_at(&self, now: DateTime<Utc>) -> bool {
        let et = now.with_timezone(&New_York);
        let today = et.date_naive();
        let current_time = et.time();

        // Weekend
        if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        // Holiday
        if self.is_holiday(today) {
            return false;
        }

        let close = if self.is_early_close(today) {
            early_close_time()
        } else {
            market_close_time()
        };

        market_open_time() <= current_time && current_time <= close
    }

    /// Whether `date` (ET calendar date) is a market holiday.
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        HOLIDAYS
            .iter()
            .any(|&(y, m, d)| date == NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    /// Whether `date` (ET calendar date) closes early at 1:00 PM.
    pub fn is_early_close(&self, date: NaiveDate) -> bool {
        EARLY_CLOSE_DAYS
            .iter()
            .any(|&(y, m, d)| date == NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    /// The broker-local (ET) calendar date for `now`. Daily risk counters
    /// roll over on this date, not on the UTC date.
    pub fn market_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&New_York).date_naive()
    }

    /// Minutes until the market opens. Returns 0.0 when already open.
    pub fn minutes_to_open(&self, now: DateTime<Utc>) -> f64 {
        if self.is_market_hours_at(now) {
            return 0.0;
        }

        let et = now.with_timezone(&New_York);
        let today = et.date_naive();
        let is_trading_day = !matches!(et.weekday(), Weekday::Sat | Weekday::Sun)
            && !self.is_holiday(today);

        let open_dt = if is_trading_day && et.time() < market_open_time() {
            // Before today's open.
            at_market_open(today)
        } else {
            // After close, weekend, or holiday.
            self.next_trading_day_open(today)
        };

        let diff = (open_dt.with_timezone(&Utc) - now).num_seconds() as f64 / 60.0;
        diff.max(0.0)
    }

    /// The datetime of the next market open strictly after `from_date`.
    fn next_trading_day_open(&self, from_date: NaiveDate) -> DateTime<Tz> {
        let mut d = from_date + chrono::Duration::days(1);
        // Max 10 days forward handles long weekends.
        for _ in 0..10 {
            if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(d) {
                return at_market_open(d);
            }
            d += chrono::Duration::days(1);
        }
        at_market_open(d)
    }
}

fn at_market_open(date: NaiveDate) -> DateTime<Tz> {
    New_York
        .from_local_datetime(&date.and_time(market_open_time()))
        .single()
        .expect("9:30 AM exists on every market day")
}
