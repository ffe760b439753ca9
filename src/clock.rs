// =============================================================================
// Clock abstraction + trading-session derivation
// =============================================================================
//
// Every session-aware decision in the engine reads time through the `Clock`
// trait so that tests can pin the session deterministically. Session windows
// are computed in exchange-local time using a fixed UTC offset from Settings
// (DST shifts are an ops concern: update NOVA_ET_UTC_OFFSET_HOURS twice a
// year or run the process in a scheduler that does).
//
// Windows (exchange-local):
//   premarket   04:00 - 09:30
//   regular     09:30 - 16:00
//   afterhours  16:00 - 20:00
//   closed      everything else, and all day Saturday/Sunday
// =============================================================================

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};

use crate::types::Session;

/// Source of "now" for the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Derive the trading session for a UTC instant given the exchange-local UTC
/// offset in hours (negative for the US East coast).
pub fn session_at(now: DateTime<Utc>, et_utc_offset_hours: i64) -> Session {
    let local = now + Duration::hours(et_utc_offset_hours);

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return Session::Closed;
    }

    let minute_of_day = local.hour() * 60 + local.minute();
    match minute_of_day {
        m if (240..570).contains(&m) => Session::Premarket,   // 04:00-09:30
        m if (570..960).contains(&m) => Session::Regular,     // 09:30-16:00
        m if (960..1200).contains(&m) => Session::Afterhours, // 16:00-20:00
        _ => Session::Closed,
    }
}
