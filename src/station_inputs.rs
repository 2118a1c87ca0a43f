use std::fs;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{error, info, instrument, warn};

use crate::alignment::{self, HourlyAlignment, DEFAULT_TOLERANCE_MINUTES};
use crate::error::{PipelineError, Result};
use crate::fetcher::{TabularFetcher, TabularRequest};
use crate::manifest::{
    FailureStep, Outputs, RequestedParams, RunManifest, StationDiagnostics, StepError, Window,
};
use crate::station_file::{StationRow, StationTemplate, UnitSystem};
use crate::stations::Station;
use crate::tabular::{self, ParsedTable};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Station value recorded for errors that are not tied to one station.
pub const ALL_STATIONS: &str = "*";

#[derive(Debug, Clone)]
pub struct StationInputsRequest {
    pub end_utc: DateTime<Utc>,
    pub hours: u32,
    pub out_dir: PathBuf,
    pub template_csv: PathBuf,
    pub unit: String,
    pub range_hours: u32,
    pub cache_raw: bool,
    pub best_effort: bool,
    pub area: String,
    pub time_zone: String,
    pub tolerance: Duration,
}

impl StationInputsRequest {
    pub fn new(end_utc: DateTime<Utc>, out_dir: PathBuf, template_csv: PathBuf) -> Self {
        Self {
            end_utc,
            hours: 18,
            out_dir,
            template_csv,
            unit: "e".to_string(),
            range_hours: 48,
            cache_raw: false,
            best_effort: false,
            area: "caic".to_string(),
            time_zone: crate::config::DEFAULT_TIME_ZONE.to_string(),
            tolerance: Duration::minutes(DEFAULT_TOLERANCE_MINUTES),
        }
    }
}

/// Everything one station contributed to the run.
#[derive(Debug, Clone)]
pub struct StationOutcome {
    pub diagnostics: StationDiagnostics,
    pub hourly: HourlyAlignment,
    pub errors: Vec<StepError>,
    pub raw_file: Option<PathBuf>,
}

impl StationOutcome {
    pub fn fetch_failed(&self) -> bool {
        !self.diagnostics.fetch_ok
    }
}

#[derive(Debug, Clone)]
pub struct StationInputsReport {
    pub manifest: RunManifest,
    pub manifest_path: PathBuf,
}

/// Drives fetch → parse → align → write for a set of stations.
///
/// Stations are fetched one at a time. A station failure is recorded and the
/// run moves on; whether the run failed is decided after every station.
pub struct StationInputsBuilder<'a> {
    fetcher: &'a TabularFetcher,
    stations: &'a [Station],
    pacing: StdDuration,
}

impl<'a> StationInputsBuilder<'a> {
    pub fn new(fetcher: &'a TabularFetcher, stations: &'a [Station]) -> Self {
        Self {
            fetcher,
            stations,
            pacing: StdDuration::from_millis(200),
        }
    }

    /// Pause between consecutive station fetches.
    pub fn with_pacing(mut self, pacing: StdDuration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Run the pipeline. `now` only stamps the manifest.
    ///
    /// The manifest is always written once stations have been attempted. The
    /// result is `StationFetchFailures` when any fetch failed and the request
    /// is not best-effort.
    #[instrument(skip(self, request), fields(end_utc = %request.end_utc, hours = request.hours))]
    pub async fn build(
        &self,
        request: &StationInputsRequest,
        now: DateTime<Utc>,
    ) -> Result<StationInputsReport> {
        // Reject bad parameters before any network traffic
        if request.hours == 0 {
            return Err(PipelineError::InvalidRequest(
                "hours must be > 0".to_string(),
            ));
        }
        if request.range_hours == 0 {
            return Err(PipelineError::InvalidRequest(
                "range_hours must be > 0".to_string(),
            ));
        }

        let tz = tabular::resolve_time_zone(&request.time_zone)?;
        let template = StationTemplate::read(&request.template_csv)?;
        fs::create_dir_all(&request.out_dir)?;

        let end_aligned = alignment::truncate_to_hour(request.end_utc);
        let targets = alignment::target_hours(end_aligned, request.hours);
        let end_local = end_aligned.with_timezone(&tz).naive_local();

        info!(
            "Building station inputs for {} stations over {} hours ending {}",
            self.stations.len(),
            targets.len(),
            end_aligned
        );

        let mut outcomes = Vec::with_capacity(self.stations.len());
        for (index, station) in self.stations.iter().enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            let outcome = self
                .process_station(station, request, &tz, end_local, end_aligned, &targets)
                .await;
            outcomes.push(outcome);
        }

        // One station file per target hour; write failures still end up in the manifest
        let units = UnitSystem::from_flag(&request.unit);
        let mut csv_files = Vec::with_capacity(targets.len());
        let mut write_errors = Vec::new();
        let mut first_write_error = None;
        for (slot, hour) in targets.iter().enumerate() {
            let rows: Vec<StationRow> = self
                .stations
                .iter()
                .zip(&outcomes)
                .map(|(station, outcome)| {
                    let readings = outcome
                        .hourly
                        .get(slot)
                        .and_then(|m| m.sample.as_ref())
                        .map(|s| s.readings());
                    StationRow::from_readings(station, readings, &units)
                })
                .collect();

            let out_csv = request
                .out_dir
                .join(format!("stations_{}.csv", hour.format("%Y%m%d_%H00Z")));
            match template.write(&out_csv, &rows) {
                Ok(()) => csv_files.push(out_csv),
                Err(e) => {
                    error!(error = %e, "Failed to write {}", out_csv.display());
                    write_errors.push(StepError {
                        station: ALL_STATIONS.to_string(),
                        step: FailureStep::Write,
                        error: format!("{}: {}", out_csv.display(), e),
                        url: None,
                    });
                    first_write_error.get_or_insert(e);
                }
            }
        }

        let manifest_path = request.out_dir.join(MANIFEST_FILE);
        let manifest = RunManifest {
            created_utc: now,
            requested: RequestedParams {
                end_utc: request.end_utc,
                end_utc_aligned: end_aligned,
                hours: request.hours,
                range_hours: request.range_hours,
                unit: request.unit.clone(),
                area: request.area.clone(),
                tz_local: request.time_zone.clone(),
                tolerance_minutes: request.tolerance.num_minutes(),
                best_effort: request.best_effort,
                cache_raw: request.cache_raw,
            },
            window: Window {
                start_utc: targets[0],
                end_utc: end_aligned,
                hours_utc: targets.clone(),
            },
            stations: outcomes.iter().map(|o| o.diagnostics.clone()).collect(),
            outputs: Outputs {
                out_dir: request.out_dir.clone(),
                template_csv: request.template_csv.clone(),
                csv_files,
                raw_html_files: outcomes.iter().filter_map(|o| o.raw_file.clone()).collect(),
                manifest_path: manifest_path.clone(),
            },
            errors: outcomes
                .iter()
                .flat_map(|o| o.errors.clone())
                .chain(write_errors)
                .collect(),
        };
        manifest.write(&manifest_path)?;
        info!("Wrote manifest to {}", manifest_path.display());

        if let Some(e) = first_write_error {
            return Err(e.into());
        }

        let fetch_failures = outcomes.iter().filter(|o| o.fetch_failed()).count();
        if fetch_failures > 0 {
            if request.best_effort {
                warn!(
                    "{} station fetch failure(s), continuing in best-effort mode",
                    fetch_failures
                );
            } else {
                error!("{} station fetch failure(s)", fetch_failures);
                return Err(PipelineError::StationFetchFailures {
                    count: fetch_failures,
                    manifest: manifest_path,
                });
            }
        }

        Ok(StationInputsReport {
            manifest,
            manifest_path,
        })
    }

    #[instrument(skip_all, fields(station = %station.code))]
    async fn process_station(
        &self,
        station: &Station,
        request: &StationInputsRequest,
        tz: &Tz,
        end_local: chrono::NaiveDateTime,
        end_aligned: DateTime<Utc>,
        targets: &[DateTime<Utc>],
    ) -> StationOutcome {
        let fetch_request = TabularRequest {
            station: station.code.clone(),
            end_local,
            range_hours: request.range_hours,
            unit: request.unit.clone(),
            area: request.area.clone(),
        };

        let mut diagnostics = StationDiagnostics {
            code: station.code.clone(),
            name: station.name.clone(),
            lat: station.lat,
            lon: station.lon,
            height_m: station.height_m,
            url: None,
            fetch_ok: false,
            fetch_error: None,
            parsed_records: 0,
            parsed_columns: Vec::new(),
            parsed_first_dt_utc: None,
            parsed_last_dt_utc: None,
            hourly_missing_hours_utc: Vec::new(),
        };
        let mut errors = Vec::new();
        let mut raw_file = None;

        let url = self
            .fetcher
            .build_url(&fetch_request)
            .map(|u| u.to_string())
            .ok();
        diagnostics.url = url.clone();

        let document = match self.fetcher.fetch(&fetch_request).await {
            Ok(text) => {
                diagnostics.fetch_ok = true;
                Some(text)
            }
            Err(e) => {
                error!(error = %e, "Station fetch failed");
                diagnostics.fetch_error = Some(e.to_string());
                errors.push(StepError {
                    station: station.code.clone(),
                    step: FailureStep::Fetch,
                    error: e.to_string(),
                    url: url.clone(),
                });
                None
            }
        };

        if let (true, Some(text)) = (request.cache_raw, document.as_ref()) {
            let raw_path = request.out_dir.join(format!(
                "caic_{}_end_{}.html",
                station.code,
                end_aligned.format("%Y%m%d_%H00Z")
            ));
            match fs::write(&raw_path, text) {
                Ok(()) => raw_file = Some(raw_path),
                Err(e) => warn!("Failed to cache raw page {}: {}", raw_path.display(), e),
            }
        }

        let table = document.and_then(|text| match tabular::parse_tabular(&text, tz) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!(error = %e, "Station parse failed");
                errors.push(StepError {
                    station: station.code.clone(),
                    step: FailureStep::Parse,
                    error: e.to_string(),
                    url: url.clone(),
                });
                None
            }
        });

        let samples = table.as_ref().map(|t| t.samples.as_slice()).unwrap_or(&[]);
        if let Some(table) = &table {
            record_table(&mut diagnostics, table);
        }

        let hourly = alignment::align(samples, targets, request.tolerance);
        diagnostics.hourly_missing_hours_utc = alignment::missing_hours(&hourly);
        info!(
            records = diagnostics.parsed_records,
            missing_hours = diagnostics.hourly_missing_hours_utc.len(),
            "Station processed"
        );

        StationOutcome {
            diagnostics,
            hourly,
            errors,
            raw_file,
        }
    }
}

fn record_table(diagnostics: &mut StationDiagnostics, table: &ParsedTable) {
    diagnostics.parsed_records = table.samples.len();
    diagnostics.parsed_first_dt_utc = table.first_utc();
    diagnostics.parsed_last_dt_utc = table.last_utc();
    if !table.samples.is_empty() {
        diagnostics.parsed_columns = table.columns.clone();
    }
}
