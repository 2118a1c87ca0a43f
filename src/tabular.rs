// CAIC tabular station data
//
// The station pages wrap a whitespace-aligned text table in a <PRE> block:
// - one header line naming the columns after "Date Time"
// - one data line per observation, stamped in station-local civil time
//
// parser: <PRE> extraction, header detection and line grammars
// time:   zone-aware conversion of civil timestamps to UTC

pub mod parser;
pub mod time;

pub use parser::{
    parse_tabular, HeaderMatch, NormalizedSample, ParsedTable, RawSample, Readings,
    TimestampGrammar,
};
pub use time::{local_to_utc, resolve_time_zone};

#[derive(Debug, thiserror::Error)]
pub enum TabularError {
    #[error("Could not detect header line containing 'Date' and 'Time'")]
    HeaderNotFound,
    #[error("Unsupported time zone: {0}")]
    UnsupportedTimeZone(String),
}
