use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::time::local_to_utc;
use super::TabularError;

/// Tokens the station pages print for a missing measurement.
pub const MISSING_TOKENS: &[&str] = &[
    "", "M", "m", "NA", "N/A", "nan", "NaN", "---", "--", "////", "null", "NULL", "T",
];

/// Column values of one data line, in header order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Readings(Vec<(String, Option<f64>)>);

impl Readings {
    pub fn new(values: Vec<(String, Option<f64>)>) -> Self {
        Self(values)
    }

    /// Case-insensitive lookup. `None` when the column does not exist,
    /// `Some(None)` when it exists but the value is missing.
    pub fn get(&self, column: &str) -> Option<Option<f64>> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| *value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One data line as printed, before any time zone is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSample {
    pub local_timestamp: NaiveDateTime,
    pub readings: Readings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSample {
    pub raw: RawSample,
    pub utc: DateTime<Utc>,
}

impl NormalizedSample {
    pub fn readings(&self) -> &Readings {
        &self.raw.readings
    }
}

/// How the header line was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMatch {
    /// First two tokens are literally `Date` and `Time`.
    Strict,
    /// Line mentions date and time plus a wind column (`spd` or `dir`).
    Heuristic,
}

/// Timestamp layout of a data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimestampGrammar {
    /// `YYYY Mon DD HH:MM am|pm`
    TwelveHour,
    /// `YYYY Mon DD HH:MM`
    TwentyFourHour,
}

impl TimestampGrammar {
    /// Index of the first value token.
    pub fn data_start(self) -> usize {
        match self {
            TimestampGrammar::TwelveHour => 5,
            TimestampGrammar::TwentyFourHour => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTable {
    pub header: HeaderMatch,
    pub columns: Vec<String>,
    /// Sorted ascending by UTC instant.
    pub samples: Vec<NormalizedSample>,
    pub skipped_lines: usize,
}

impl ParsedTable {
    pub fn first_utc(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|s| s.utc)
    }

    pub fn last_utc(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|s| s.utc)
    }
}

/// Parse a tabular.php document into samples stamped in UTC.
///
/// Fails with `HeaderNotFound` when no header line can be identified, since
/// the value columns cannot be named without it. Data lines that match
/// neither timestamp grammar, or carry fewer values than there are columns,
/// are skipped.
#[instrument(skip(document, tz), fields(document_size = document.len()))]
pub fn parse_tabular(document: &str, tz: &Tz) -> Result<ParsedTable, TabularError> {
    let body = extract_pre_text(document);
    let lines: Vec<&str> = body.lines().map(str::trim_end).collect();

    let (header, header_tokens) = detect_header(&lines).ok_or_else(|| {
        warn!("No header line found in tabular text");
        debug!(
            "Text preview (first 500 chars): {}",
            body.chars().take(500).collect::<String>()
        );
        TabularError::HeaderNotFound
    })?;

    let columns: Vec<String> = header_tokens.iter().skip(2).map(|t| t.to_string()).collect();
    debug!("Detected {:?} header with columns {:?}", header, columns);

    let mut samples = Vec::new();
    let mut skipped_lines = 0;

    for line in &lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if !is_year(parts[0]) {
            continue;
        }

        let Some((local_timestamp, grammar)) = parse_timestamp(&parts) else {
            debug!("Unparseable timestamp, skipping: {}", trimmed);
            skipped_lines += 1;
            continue;
        };

        let values = &parts[grammar.data_start()..];
        if values.len() < columns.len() {
            debug!(
                "Line has {} values for {} columns, skipping: {}",
                values.len(),
                columns.len(),
                trimmed
            );
            skipped_lines += 1;
            continue;
        }

        let readings = Readings::new(
            columns
                .iter()
                .zip(values)
                .map(|(name, token)| (name.clone(), parse_value(token)))
                .collect(),
        );

        samples.push(NormalizedSample {
            utc: local_to_utc(local_timestamp, tz),
            raw: RawSample {
                local_timestamp,
                readings,
            },
        });
    }

    if skipped_lines > 0 {
        warn!("Skipped {} unparseable data lines", skipped_lines);
    }

    samples.sort_by_key(|s| s.utc);
    debug!("Parsed {} samples", samples.len());

    Ok(ParsedTable {
        header,
        columns,
        samples,
        skipped_lines,
    })
}

/// Text of every <PRE> block, or the whole document when there is none.
fn extract_pre_text(document: &str) -> String {
    let html = Html::parse_document(document);
    let Ok(pre_selector) = Selector::parse("pre") else {
        return document.to_string();
    };

    let text: String = html
        .select(&pre_selector)
        .flat_map(|element| element.text())
        .collect();
    let text = text.trim_matches('\n');

    if text.trim().is_empty() {
        debug!("No <PRE> content found, using whole document");
        document.to_string()
    } else {
        text.to_string()
    }
}

/// Strict match anywhere wins over the heuristic.
fn detect_header<'a>(lines: &[&'a str]) -> Option<(HeaderMatch, Vec<&'a str>)> {
    let strict = lines.iter().copied().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        (tokens.len() >= 2
            && tokens[0].eq_ignore_ascii_case("date")
            && tokens[1].eq_ignore_ascii_case("time"))
        .then_some(tokens)
    });
    if let Some(tokens) = strict {
        return Some((HeaderMatch::Strict, tokens));
    }

    lines.iter().copied().find_map(|line| {
        let lower = line.to_lowercase();
        (lower.contains("date")
            && lower.contains("time")
            && (lower.contains("spd") || lower.contains("dir")))
        .then(|| (HeaderMatch::Heuristic, line.split_whitespace().collect()))
    })
}

fn is_year(token: &str) -> bool {
    token.len() == 4 && token.chars().all(|c| c.is_ascii_digit())
}

fn parse_timestamp(parts: &[&str]) -> Option<(NaiveDateTime, TimestampGrammar)> {
    if parts.len() < 4 {
        return None;
    }
    let date_time = format!("{} {} {} {}", parts[0], parts[1], parts[2], parts[3]);

    match parts.get(4).map(|t| t.to_ascii_uppercase()) {
        Some(meridiem) if meridiem == "AM" || meridiem == "PM" => {
            NaiveDateTime::parse_from_str(&format!("{date_time} {meridiem}"), "%Y %b %d %I:%M %p")
                .ok()
                .map(|ts| (ts, TimestampGrammar::TwelveHour))
        }
        _ => NaiveDateTime::parse_from_str(&date_time, "%Y %b %d %H:%M")
            .ok()
            .map(|ts| (ts, TimestampGrammar::TwentyFourHour)),
    }
}

/// Numeric value of a cell; sentinels and anything non-numeric are missing.
pub fn parse_value(token: &str) -> Option<f64> {
    let token = token.trim();
    if MISSING_TOKENS.contains(&token) {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::resolve_time_zone;
    use chrono::TimeZone;

    fn denver() -> Tz {
        resolve_time_zone("America/Denver").unwrap()
    }

    #[test]
    fn test_parse_twelve_hour_line() {
        let text = "Date Time Temp Spd Dir\n2025 Dec 14 06:00 am 20 15 270\n";
        let table = parse_tabular(text, &denver()).unwrap();

        assert_eq!(table.header, HeaderMatch::Strict);
        assert_eq!(table.columns, vec!["Temp", "Spd", "Dir"]);
        assert_eq!(table.samples.len(), 1);

        let sample = &table.samples[0];
        assert_eq!(sample.utc, Utc.with_ymd_and_hms(2025, 12, 14, 13, 0, 0).unwrap());
        assert_eq!(sample.readings().get("temp"), Some(Some(20.0)));
        assert_eq!(sample.readings().get("Spd"), Some(Some(15.0)));
        assert_eq!(sample.readings().get("Dir"), Some(Some(270.0)));
    }

    #[test]
    fn test_parse_html_with_pre_tag() {
        let html = r#"
            <HTML>
            <BODY>
            <H2>Keystone SA - Wind Study</H2>
            <PRE>
Date        Time      Temp  MxTp  MnTp  DewP   RH   Spd  Dir  Gst
2025 Dec 14 07:00 am    21    22    20    10   60    14  265   22
2025 Dec 14 06:00 am    20    21    19    10   62    15  270   24
2025 Dec 14 05:00 am    19    20    18     M   64   ---  280    M
            </PRE>
            </BODY>
            </HTML>
        "#;

        let table = parse_tabular(html, &denver()).unwrap();
        assert_eq!(
            table.columns,
            vec!["Temp", "MxTp", "MnTp", "DewP", "RH", "Spd", "Dir", "Gst"]
        );
        assert_eq!(table.samples.len(), 3);

        // sorted ascending regardless of page order
        assert_eq!(table.samples[0].raw.local_timestamp.format("%H").to_string(), "05");
        assert_eq!(table.samples[2].raw.local_timestamp.format("%H").to_string(), "07");

        let oldest = table.samples[0].readings();
        assert_eq!(oldest.get("DewP"), Some(None));
        assert_eq!(oldest.get("Spd"), Some(None));
        assert_eq!(oldest.get("Gst"), Some(None));
        assert_eq!(oldest.get("Dir"), Some(Some(280.0)));
    }

    #[test]
    fn test_parse_twenty_four_hour_line() {
        let text = "Date Time Spd Dir\n2025 Jul 01 18:00 7 190\n";
        let table = parse_tabular(text, &denver()).unwrap();

        assert_eq!(table.samples.len(), 1);
        assert_eq!(
            table.samples[0].utc,
            Utc.with_ymd_and_hms(2025, 7, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(table.samples[0].readings().get("spd"), Some(Some(7.0)));
    }

    #[test]
    fn test_heuristic_header() {
        let text = "Station obs (Date/Time local) Spd Dir\n2025 Dec 14 06:00 am 15 270\n";
        let table = parse_tabular(text, &denver()).unwrap();

        assert_eq!(table.header, HeaderMatch::Heuristic);
        // tokens after the first two, whatever they are
        assert_eq!(table.columns, vec!["(Date/Time", "local)", "Spd", "Dir"]);
    }

    #[test]
    fn test_strict_header_preferred_over_earlier_heuristic_line() {
        let text = "Listing date/time with spd\nDate Time Spd\n2025 Dec 14 06:00 am 15\n";
        let table = parse_tabular(text, &denver()).unwrap();

        assert_eq!(table.header, HeaderMatch::Strict);
        assert_eq!(table.columns, vec!["Spd"]);
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let html = "<html><body><pre>2025 Dec 14 06:00 am 20 15 270</pre></body></html>";
        let result = parse_tabular(html, &denver());
        assert!(matches!(result, Err(TabularError::HeaderNotFound)));
    }

    #[test]
    fn test_skips_short_and_malformed_lines() {
        let text = "\
Date Time Temp Spd Dir
2025 Dec 14 06:00 am 20 15
2025 Dec 14 07:00 am 21 14 265

2025 Foo 14 08:00 am 22 13 260
Notes: 2025 data is provisional
12345 Dec 14 09:00 am 22 13 260
";
        let table = parse_tabular(text, &denver()).unwrap();
        assert_eq!(table.samples.len(), 1);
        assert_eq!(table.samples[0].readings().get("Spd"), Some(Some(14.0)));
        assert_eq!(table.skipped_lines, 2);
    }

    #[test]
    fn test_falls_back_to_whole_document_when_pre_is_empty() {
        let text = "<html><pre>   </pre></html>\nDate Time Spd\n2025 Dec 14 06:00 am 9\n";
        let table = parse_tabular(text, &denver()).unwrap();
        assert_eq!(table.samples.len(), 1);
    }

    #[test]
    fn test_missing_tokens_parse_to_absent() {
        for token in MISSING_TOKENS {
            assert_eq!(parse_value(token), None, "token {token:?}");
        }
        assert_eq!(parse_value("inf"), None);
        assert_eq!(parse_value("calm"), None);
        assert_eq!(parse_value("0"), Some(0.0));
        assert_eq!(parse_value("-3.5"), Some(-3.5));
    }

    #[test]
    fn test_first_and_last_utc() {
        let text = "Date Time Spd\n2025 Dec 14 07:00 am 1\n2025 Dec 14 06:00 am 2\n";
        let table = parse_tabular(text, &denver()).unwrap();
        assert_eq!(
            table.first_utc(),
            Some(Utc.with_ymd_and_hms(2025, 12, 14, 13, 0, 0).unwrap())
        );
        assert_eq!(
            table.last_utc(),
            Some(Utc.with_ymd_and_hms(2025, 12, 14, 14, 0, 0).unwrap())
        );
    }
}
