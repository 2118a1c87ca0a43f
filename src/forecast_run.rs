use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use tracing::{error, info, instrument, warn};

use crate::archive::{self, GRIB_CACHE_RETENTION};
use crate::config::Config;
use crate::error::Result;
use crate::publish::{self, Publisher, RunState, RunStatus};
use crate::solver::{self, WindSolver};

/// File-name prefix for rendered configs and renamed outputs.
pub const OUTPUT_PREFIX: &str = "keystone";

/// Length of the fixed morning and afternoon windows.
const HALF_DAY_WINDOW_HOURS: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Forecast,
    FullForecast,
    AmForecast,
    PmForecast,
    Reanalysis,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "forecast" => Ok(RunMode::Forecast),
            "full_forecast" => Ok(RunMode::FullForecast),
            "am_forecast" => Ok(RunMode::AmForecast),
            "pm_forecast" => Ok(RunMode::PmForecast),
            "reanalysis" => Ok(RunMode::Reanalysis),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Forecast,
    Reanalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Small,
    Large,
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(Domain::Small),
            "large" => Ok(Domain::Large),
            other => Err(format!("unknown domain '{other}' (expected 'small' or 'large')")),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Small => write!(f, "small"),
            Domain::Large => write!(f, "large"),
        }
    }
}

/// Upstream weather model driving the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherModel {
    Hrrr,
    Nbm,
    Nam,
}

impl WeatherModel {
    /// Name used in labels and bucket paths.
    pub fn code(&self) -> &'static str {
        match self {
            WeatherModel::Hrrr => "HRRR",
            WeatherModel::Nbm => "NBM",
            WeatherModel::Nam => "NAM",
        }
    }

    /// Solver's identifier for the model's download source.
    pub fn source_id(&self) -> &'static str {
        match self {
            WeatherModel::Hrrr => "NOMADS-HRRR-CONUS-3-KM",
            WeatherModel::Nbm => "NOMADS-NBM-CONUS-2.5-KM",
            WeatherModel::Nam => "NOMADS-NAM-NEST-CONUS-3-KM",
        }
    }
}

impl FromStr for WeatherModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HRRR" => Ok(WeatherModel::Hrrr),
            "NBM" => Ok(WeatherModel::Nbm),
            "NAM" => Ok(WeatherModel::Nam),
            other => Err(format!("unknown model '{other}' (expected HRRR, NBM or NAM)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub label: String,
    pub kind: RunKind,
}

/// Solver window for `mode` relative to `now`.
///
/// Forecasts run forward `hours` from the current hour; the AM and PM
/// modes are fixed six-hour windows at 07Z and 19Z of the current UTC day;
/// reanalysis covers the `hours` leading up to the current hour.
pub fn run_window(mode: RunMode, hours: u32, now: DateTime<Utc>) -> RunWindow {
    let hour = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
    let day = now.duration_trunc(Duration::days(1)).unwrap_or(now);
    let span = Duration::hours(i64::from(hours));

    match mode {
        RunMode::Forecast | RunMode::FullForecast => RunWindow {
            start: hour,
            stop: hour + span,
            label: format!("forecast_{hours}h"),
            kind: RunKind::Forecast,
        },
        RunMode::AmForecast => {
            let start = day + Duration::hours(7);
            RunWindow {
                start,
                stop: start + Duration::hours(HALF_DAY_WINDOW_HOURS),
                label: "am_forecast".to_string(),
                kind: RunKind::Forecast,
            }
        }
        RunMode::PmForecast => {
            let start = day + Duration::hours(19);
            RunWindow {
                start,
                stop: start + Duration::hours(HALF_DAY_WINDOW_HOURS),
                label: "pm_forecast".to_string(),
                kind: RunKind::Forecast,
            }
        }
        RunMode::Reanalysis => RunWindow {
            start: hour - span,
            stop: hour,
            label: format!("reanalysis_{hours}h"),
            kind: RunKind::Reanalysis,
        },
    }
}

#[derive(Debug, Clone)]
pub struct ForecastRunRequest {
    pub mode: RunMode,
    pub hours: u32,
    pub domain: Domain,
    pub model: WeatherModel,
    /// Render the config but skip the solver, archiving and publishing.
    pub dry_run: bool,
    /// Leave the run directory in place instead of archiving it.
    pub keep_temp: bool,
}

#[derive(Debug, Clone)]
pub struct ForecastRunReport {
    pub window: RunWindow,
    pub run_dir: PathBuf,
    pub config_path: PathBuf,
    pub archive_path: Option<PathBuf>,
    pub archive_url: Option<String>,
}

/// Run the solver for one window and package the results.
///
/// When `publisher` is set (and this is not a dry run) a running status is
/// published first and a success or failure status at the end, each
/// followed by an index refresh. Publishing problems are logged and never
/// fail the run.
#[instrument(skip(config, publisher), fields(mode = ?request.mode, model = request.model.code()))]
pub async fn execute(
    config: &Config,
    request: &ForecastRunRequest,
    publisher: Option<&dyn Publisher>,
    now: DateTime<Utc>,
) -> Result<ForecastRunReport> {
    let window = run_window(request.mode, request.hours, now);
    let model = request.model.code();
    let publisher = publisher.filter(|_| !request.dry_run);
    let today = now.date_naive();

    let run_dir = config.temp_dir.join(format!(
        "{}_{}_{}",
        now.format("%Y%m%d"),
        window.label,
        model
    ));

    info!(
        "Starting {} ({}, {} domain) for {} to {}",
        window.label,
        request.model.source_id(),
        request.domain,
        window.start,
        window.stop
    );

    // Mark the run as started so the index shows it in progress
    if let Some(publisher) = publisher {
        publish_status(publisher, RunStatus::new(RunState::Running, &window.label, model, now), today, now);
    }

    let result = run_steps(config, request, publisher, &window, &run_dir, now).await;

    match result {
        Ok(report) => {
            info!("Run {} completed", window.label);
            Ok(report)
        }
        Err(e) => {
            error!("Run {} failed: {}", window.label, e);
            if let Some(publisher) = publisher {
                publish_status(
                    publisher,
                    RunStatus::failed(&window.label, model, now, e.to_string()),
                    today,
                    now,
                );
            }
            Err(e)
        }
    }
}

async fn run_steps(
    config: &Config,
    request: &ForecastRunRequest,
    publisher: Option<&dyn Publisher>,
    window: &RunWindow,
    run_dir: &std::path::Path,
    now: DateTime<Utc>,
) -> Result<ForecastRunReport> {
    let model = request.model.code();
    let template = config.domain_template(&request.domain.to_string());
    let config_path = solver::write_run_config(&template, OUTPUT_PREFIX, window.start, window.stop, run_dir)?;

    let mut report = ForecastRunReport {
        window: window.clone(),
        run_dir: run_dir.to_path_buf(),
        config_path: config_path.clone(),
        archive_path: None,
        archive_url: None,
    };

    if request.dry_run {
        info!("Dry run: config written to {}", config_path.display());
        return Ok(report);
    }

    WindSolver::new(config.windninja_cli.clone(), config.solver_case_root())
        .run(&config_path)
        .await?;

    if window.kind == RunKind::Reanalysis {
        let renamed = solver::rename_batch_outputs(run_dir, OUTPUT_PREFIX)?;
        info!("Renamed {} reanalysis output file(s)", renamed.len());
    }

    if let Some(publisher) = publisher {
        publish_status(publisher, RunStatus::new(RunState::Success, &window.label, model, now), now.date_naive(), now);
    }

    if request.keep_temp {
        info!("Keeping run directory {}", run_dir.display());
        return Ok(report);
    }

    let base_name = format!("{}_{}_{}_{}", OUTPUT_PREFIX, window.label, model, now.format("%Y%m%d"));
    let archive_path = archive::archive_results(run_dir, &config.archive_dir, &base_name)?;

    if let Some(publisher) = publisher {
        report.archive_url = publish_archive(publisher, &archive_path, &window.label, model, config, now);
    }

    let system_now = std::time::SystemTime::from(now);
    let archive_retention = StdDuration::from_secs(config.archive_retention_days * 24 * 3600);
    archive::enforce_retention(&config.archive_dir, archive_retention, system_now)?;
    archive::enforce_retention(&config.grib_cache_dir(), GRIB_CACHE_RETENTION, system_now)?;

    report.archive_path = Some(archive_path);
    Ok(report)
}

fn publish_status(publisher: &dyn Publisher, status: RunStatus, date: NaiveDate, now: DateTime<Utc>) {
    if let Err(e) = publisher.upload_status(&status, date) {
        warn!("Failed to publish status: {}", e);
    }
    if let Err(e) = publisher.update_index(now) {
        warn!("Failed to update index: {}", e);
    }
}

fn publish_archive(
    publisher: &dyn Publisher,
    archive_path: &std::path::Path,
    label: &str,
    model: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Option<String> {
    let file_name = archive_path.file_name()?.to_string_lossy().into_owned();
    let key = publish::archive_key(now.date_naive(), label, model, &file_name);

    let url = match publisher.upload_file(archive_path, &key) {
        Ok(url) => url,
        Err(e) => {
            warn!("Failed to upload archive: {}", e);
            return None;
        }
    };
    if let Err(e) = publisher.update_index(now) {
        warn!("Failed to update index: {}", e);
    }
    let days_to_keep = i64::try_from(config.archive_retention_days).unwrap_or(i64::MAX);
    if let Err(e) = publisher.cleanup_old_forecasts(days_to_keep, now.date_naive()) {
        warn!("Failed to clean up published forecasts: {}", e);
    }
    Some(url)
}
