use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use super::TabularError;

/// Look up an IANA zone by name.
///
/// There is no fixed-offset fallback: a wrong offset would silently shift
/// every sample on one side of a DST transition.
pub fn resolve_time_zone(name: &str) -> Result<Tz, TabularError> {
    name.parse::<Tz>()
        .map_err(|_| TabularError::UnsupportedTimeZone(name.to_string()))
}

/// Interpret a station-local civil timestamp in `tz` and return the UTC instant.
///
/// Repeated wall-clock times at the end of daylight saving resolve to the
/// earlier instant. Times skipped at the start of daylight saving are read
/// with the offset that was in force just before the jump.
pub fn local_to_utc(naive: NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => local.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before = tz.offset_from_utc_datetime(&(naive - Duration::days(1)));
            let offset_secs = i64::from(before.fix().local_minus_utc());
            Utc.from_utc_datetime(&(naive - Duration::seconds(offset_secs)))
        }
    }
}
