use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit record of one station-inputs run. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub created_utc: DateTime<Utc>,
    pub requested: RequestedParams,
    pub window: Window,
    pub stations: Vec<StationDiagnostics>,
    pub outputs: Outputs,
    pub errors: Vec<StepError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedParams {
    pub end_utc: DateTime<Utc>,
    pub end_utc_aligned: DateTime<Utc>,
    pub hours: u32,
    pub range_hours: u32,
    pub unit: String,
    pub area: String,
    pub tz_local: String,
    pub tolerance_minutes: i64,
    pub best_effort: bool,
    pub cache_raw: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub hours_utc: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDiagnostics {
    pub code: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub height_m: f64,
    pub url: Option<String>,
    pub fetch_ok: bool,
    pub fetch_error: Option<String>,
    pub parsed_records: usize,
    pub parsed_columns: Vec<String>,
    pub parsed_first_dt_utc: Option<DateTime<Utc>>,
    pub parsed_last_dt_utc: Option<DateTime<Utc>>,
    pub hourly_missing_hours_utc: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    pub out_dir: PathBuf,
    pub template_csv: PathBuf,
    pub csv_files: Vec<PathBuf>,
    pub raw_html_files: Vec<PathBuf>,
    pub manifest_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStep {
    Fetch,
    Parse,
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub station: String,
    pub step: FailureStep,
    pub error: String,
    pub url: Option<String>,
}

impl RunManifest {
    pub fn fetch_failures(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.step == FailureStep::Fetch)
            .count()
    }

    pub fn write(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    pub fn read(path: &Path) -> Result<Self, std::io::Error> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
