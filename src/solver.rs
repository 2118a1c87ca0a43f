use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Keys the pipeline always sets itself; template values for them are dropped.
const FORCED_OUTPUT_KEYS: [&str; 6] = [
    "output_wind_height",
    "units_output_wind_height",
    "output_speed_units",
    "write_ascii_output",
    "write_goog_output",
    "output_path",
];

/// Companions of a `_vel.asc` grid that share its base name.
const VELOCITY_SIDECARS: [&str; 5] = ["_ang.asc", "_vel.prj", "_ang.prj", "_vel.asc.aux.xml", "_80m.kmz"];

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Solver config template not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("Failed to start solver {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Solver exited with {status} for {config}")]
    ExitStatus { status: String, config: PathBuf },

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fill the `{start_year}` .. `{forecast_duration}` placeholders of a
/// template and pin the output settings to `output_dir`.
pub fn render_config(
    template: &str,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    output_dir: &Path,
) -> String {
    let duration_hours = ((stop - start).num_hours()).max(1);

    let placeholders = [
        ("{start_year}", start.year().to_string()),
        ("{start_month}", start.month().to_string()),
        ("{start_day}", start.day().to_string()),
        ("{start_hour}", start.hour().to_string()),
        ("{start_minute}", start.minute().to_string()),
        ("{stop_year}", stop.year().to_string()),
        ("{stop_month}", stop.month().to_string()),
        ("{stop_day}", stop.day().to_string()),
        ("{stop_hour}", stop.hour().to_string()),
        ("{stop_minute}", stop.minute().to_string()),
        ("{forecast_duration}", duration_hours.to_string()),
    ];
    let filled = placeholders
        .iter()
        .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value));

    let mut lines: Vec<String> = filled
        .lines()
        .filter(|line| {
            let stripped = line.trim_start();
            !FORCED_OUTPUT_KEYS.iter().any(|key| stripped.starts_with(key))
        })
        .map(str::to_string)
        .collect();

    lines.push(String::new());
    lines.push("output_wind_height = 10.0".to_string());
    lines.push("units_output_wind_height = m".to_string());
    lines.push("output_speed_units = mph".to_string());
    lines.push("write_ascii_output = true".to_string());
    lines.push("write_goog_output = true".to_string());
    lines.push(format!("output_path = {}", output_dir.display()));

    lines.join("\n")
}

/// Render `template_path` into `<output_dir>/<prefix>_<YYYYMMDD_HHMM>.cfg`.
pub fn write_run_config(
    template_path: &Path,
    prefix: &str,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    output_dir: &Path,
) -> Result<PathBuf, SolverError> {
    if !template_path.exists() {
        return Err(SolverError::TemplateNotFound(template_path.to_path_buf()));
    }
    fs::create_dir_all(output_dir)?;

    let template = fs::read_to_string(template_path)?;
    let rendered = render_config(&template, start, stop, output_dir);

    let config_path = output_dir.join(format!("{}_{}.cfg", prefix, start.format("%Y%m%d_%H%M")));
    fs::write(&config_path, rendered)?;
    debug!("Wrote solver config {}", config_path.display());
    Ok(config_path)
}

/// Handle on the solver binary, an external CLI driven by a key = value
/// config file.
#[derive(Debug, Clone)]
pub struct WindSolver {
    program: PathBuf,
    case_root: PathBuf,
}

impl WindSolver {
    pub fn new(program: impl Into<PathBuf>, case_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            case_root: case_root.into(),
        }
    }

    /// Run the solver on `config_path` and wait for it to exit.
    ///
    /// Any case directory left by an earlier run of the same config is
    /// removed first so the solver starts from a clean mesh.
    #[instrument(skip(self), fields(program = %self.program.display()))]
    pub async fn run(&self, config_path: &Path) -> Result<(), SolverError> {
        let config_stem = config_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Clear any stale case directory from an earlier run
        let case_dir = self.case_root.join(format!("NINJAFOAM_{config_stem}"));
        if case_dir.exists() {
            warn!("Removing existing solver case directory: {}", case_dir.display());
            fs::remove_dir_all(&case_dir)?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(config_path);
        info!("Running solver: {:?}", cmd.as_std());

        let status = cmd.status().await.map_err(|source| SolverError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !status.success() {
            return Err(SolverError::ExitStatus {
                status: status.to_string(),
                config: config_path.to_path_buf(),
            });
        }

        info!("Solver completed with status {}", status);
        Ok(())
    }
}

const TIMESTAMP_PATTERN: &str = r"(\d{4})(\d{2})(\d{2})[-_]?(\d{2})(\d{2})";

/// Rename batch outputs to a stable, time-stamped scheme:
/// - `*_vel.asc` and its sidecars become `<prefix>_<YYYYMMDD>_<HHMM>*`
/// - `*.kmz` becomes `<prefix>_square_30m_<MM-DD-YYYY>_<HHMM>_80m.kmz`
///
/// Files without a recognisable timestamp are left alone. Returns the
/// `(from, to)` pairs that were renamed.
pub fn rename_batch_outputs(dir: &Path, prefix: &str) -> Result<Vec<(PathBuf, PathBuf)>, SolverError> {
    let pattern = Regex::new(TIMESTAMP_PATTERN)?;
    let mut renamed = Vec::new();

    for vel in files_with_suffix(dir, "_vel.asc")? {
        let name = file_name(&vel);
        let Some(caps) = pattern.captures(&name) else {
            continue;
        };
        let stamp = format!("{}{}{}_{}{}", &caps[1], &caps[2], &caps[3], &caps[4], &caps[5]);
        let base_new = dir.join(format!("{prefix}_{stamp}"));
        let base_old = vel.to_string_lossy().trim_end_matches("_vel.asc").to_string();

        rename_logged(&vel, &with_suffix(&base_new, "_vel.asc"), &mut renamed);
        for sidecar in VELOCITY_SIDECARS {
            let old = PathBuf::from(format!("{base_old}{sidecar}"));
            if old.exists() {
                rename_logged(&old, &with_suffix(&base_new, sidecar), &mut renamed);
            }
        }
    }

    for kmz in files_with_suffix(dir, ".kmz")? {
        let name = file_name(&kmz);
        let Some(caps) = pattern.captures(&name) else {
            continue;
        };
        let new_name = format!(
            "{prefix}_square_30m_{}-{}-{}_{}{}_80m.kmz",
            &caps[2], &caps[3], &caps[1], &caps[4], &caps[5]
        );
        rename_logged(&kmz, &dir.join(new_name), &mut renamed);
    }

    Ok(renamed)
}

fn files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, SolverError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && file_name(p).ends_with(suffix))
        .collect();
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", base.display(), suffix))
}

fn rename_logged(from: &Path, to: &Path, renamed: &mut Vec<(PathBuf, PathBuf)>) {
    if from == to {
        return;
    }
    match fs::rename(from, to) {
        Ok(()) => {
            debug!("Renamed {} -> {}", from.display(), to.display());
            renamed.push((from.to_path_buf(), to.to_path_buf()));
        }
        Err(e) => warn!("Failed to rename {}: {}", from.display(), e),
    }
}
