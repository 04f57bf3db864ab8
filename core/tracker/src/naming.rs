//! Day-scoped track names: `YYYY-MM-DD-<ordinal>`.

use chrono::{DateTime, Local, NaiveDate};
use tracker_protocol::Track;

use crate::clock::parse_store_time;

const NAME_DATE_FORMAT: &str = "%Y-%m-%d";

pub fn track_name(day: NaiveDate, ordinal: u32) -> String {
    format!("{}-{}", day.format(NAME_DATE_FORMAT), ordinal)
}

/// Splits a track name into its day and ordinal suffix.
pub fn parse_track_name(name: &str) -> Option<(NaiveDate, u32)> {
    let (day, ordinal) = name.trim().rsplit_once('-')?;
    let day = NaiveDate::parse_from_str(day, NAME_DATE_FORMAT).ok()?;
    let ordinal = ordinal.parse::<u32>().ok()?;
    Some((day, ordinal))
}

/// Ordinal for a track opened at `now`, given the most recent track.
///
/// The ordinal continues the previous one only when that track was both
/// named for today and closed today. A track closed by the midnight split
/// carries yesterday's name, so the first segment of a day is always `-1`.
pub fn next_ordinal(last: Option<&Track>, now: DateTime<Local>) -> u32 {
    let today = now.date_naive();
    let Some(last) = last else {
        return 1;
    };

    let closed_today = last
        .end
        .as_deref()
        .and_then(parse_store_time)
        .map(|end| end.date_naive() == today)
        .unwrap_or(false);
    if !closed_today {
        return 1;
    }

    match parse_track_name(&last.name) {
        Some((day, ordinal)) if day == today => ordinal.saturating_add(1),
        Some(_) => 1,
        None => {
            tracing::warn!(name = %last.name, "Previous track name has no ordinal suffix");
            1
        }
    }
}
