use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::fetcher::{TabularFetcher, TabularRequest};
use crate::station_file::{pick_numeric, StationFileError, DIRECTION_ALIASES, SPEED_ALIASES};
use crate::stations::Station;
use crate::tabular::{self, NormalizedSample};

pub const MPH_TO_MPS: f64 = 0.44704;
pub const GUST_ALIASES: &[&str] = &["Gst", "GST", "Gust", "WindGust"];

/// What to write when a line has wind speed but no gust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GustPolicy {
    /// Leave the gust cell empty.
    #[default]
    Blank,
    /// Report the sustained speed as the gust. Understates gusts; only use it
    /// when a downstream consumer cannot handle gaps.
    FallbackToSpeed,
}

impl FromStr for GustPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "blank" => Ok(GustPolicy::Blank),
            "fallback-to-speed" => Ok(GustPolicy::FallbackToSpeed),
            other => Err(format!(
                "unknown gust policy '{other}' (expected 'blank' or 'fallback-to-speed')"
            )),
        }
    }
}

impl fmt::Display for GustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GustPolicy::Blank => write!(f, "blank"),
            GustPolicy::FallbackToSpeed => write!(f, "fallback-to-speed"),
        }
    }
}

/// One observed line in metric units, for comparing solver output against stations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRow {
    pub timestamp_utc: DateTime<Utc>,
    pub speed_mps: Option<f64>,
    pub direction_deg: Option<f64>,
    pub gust_mps: Option<f64>,
}

/// Convert samples reported in mph into a metric series.
pub fn observation_rows(samples: &[NormalizedSample], gust_policy: GustPolicy) -> Vec<ObservationRow> {
    samples
        .iter()
        .map(|sample| {
            let readings = Some(sample.readings());
            let speed_mph = pick_numeric(readings, SPEED_ALIASES);
            let gust_mph = match (pick_numeric(readings, GUST_ALIASES), gust_policy) {
                (Some(gust), _) => Some(gust),
                (None, GustPolicy::FallbackToSpeed) => speed_mph,
                (None, GustPolicy::Blank) => None,
            };

            ObservationRow {
                timestamp_utc: sample.utc,
                speed_mps: speed_mph.map(|v| v * MPH_TO_MPS),
                direction_deg: pick_numeric(readings, DIRECTION_ALIASES),
                gust_mps: gust_mph.map(|v| v * MPH_TO_MPS),
            }
        })
        .collect()
}

pub fn write_observations(path: &Path, rows: &[ObservationRow]) -> std::result::Result<(), StationFileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["timestamp_utc", "speed_mps", "direction_deg", "gust_mps"])?;
    for row in rows {
        writer.write_record([
            row.timestamp_utc.to_rfc3339(),
            format_cell(row.speed_mps),
            format_cell(row.direction_deg),
            format_cell(row.gust_mps),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_default()
}

/// Fetch the trailing `hours_back` hours for each station and write `obs_<code>.csv`.
///
/// Stations that fail to fetch or parse are logged and skipped.
#[instrument(skip(fetcher, stations), fields(stations = stations.len()))]
pub async fn export_observations(
    fetcher: &TabularFetcher,
    stations: &[Station],
    now: DateTime<Utc>,
    hours_back: u32,
    time_zone: &str,
    out_dir: &Path,
    gust_policy: GustPolicy,
) -> Result<Vec<PathBuf>> {
    let tz = tabular::resolve_time_zone(time_zone)?;
    let end_local = now.with_timezone(&tz).naive_local();

    let mut written = Vec::new();
    for station in stations {
        let request = TabularRequest::new(station.code.clone(), end_local, hours_back);

        let text = match fetcher.fetch(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(station = %station.code, error = %e, "Skipping station");
                continue;
            }
        };
        let table = match tabular::parse_tabular(&text, &tz) {
            Ok(table) => table,
            Err(e) => {
                warn!(station = %station.code, error = %e, "Skipping station");
                continue;
            }
        };

        let rows = observation_rows(&table.samples, gust_policy);
        let path = out_dir.join(format!("obs_{}.csv", station.code));
        write_observations(&path, &rows)?;
        info!(station = %station.code, rows = rows.len(), "Wrote {}", path.display());
        written.push(path);
    }

    Ok(written)
}
