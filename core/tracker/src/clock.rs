//! Wall-clock access and local-day arithmetic.

use chrono::{DateTime, Days, Duration, Local, LocalResult, NaiveTime, TimeZone};

pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// First local midnight strictly after `now`.
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(now.date_naive())
        .and_time(NaiveTime::MIN);

    match Local.from_local_datetime(&tomorrow) {
        LocalResult::Single(at) => at,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Midnight skipped by a DST jump; the day starts an hour later.
        LocalResult::None => Local
            .from_local_datetime(&(tomorrow + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| now + Duration::days(1)),
    }
}

/// Store and wire timestamps are RFC3339 with the local offset.
pub fn to_store_time(at: DateTime<Local>) -> String {
    at.to_rfc3339()
}

pub fn parse_store_time(value: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Local))
}
