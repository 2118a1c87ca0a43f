use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const INDEX_FILE: &str = "index.json";
pub const NETWORK_LINK_FILE: &str = "latest.kml";
pub const ARCHIVES_PREFIX: &str = "archives";

/// Status records older than this many days are left out of the index.
pub const STATUS_LOOKBACK_DAYS: i64 = 3;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Local file not found: {0}")]
    MissingSource(PathBuf),

    #[error("Invalid destination path: {0}")]
    InvalidDestination(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub status: RunState,
    pub updated: DateTime<Utc>,
    pub run_type: String,
    pub model: String,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(state: RunState, run_type: &str, model: &str, updated: DateTime<Utc>) -> Self {
        Self {
            status: state,
            updated,
            run_type: run_type.to_string(),
            model: model.to_string(),
            error: None,
        }
    }

    pub fn failed(run_type: &str, model: &str, updated: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RunState::Failure, run_type, model, updated)
        }
    }

    /// Bucket key for this status on `date`.
    pub fn key(&self, date: NaiveDate) -> String {
        format!(
            "{}/status_{}_{}.json",
            date.format("%Y-%m-%d"),
            self.run_type,
            self.model
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub date: String,
    pub run_type: String,
    pub model: String,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkLinks {
    pub latest_forecast_kmz: Option<String>,
    pub latest_reanalysis_kmz: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketIndex {
    pub updated: DateTime<Utc>,
    pub base_url: String,
    pub description_header: String,
    pub forecasts: Vec<ForecastEntry>,
    pub statuses: BTreeMap<String, RunStatus>,
    pub kml_network_links: NetworkLinks,
}

/// Destination key for a run archive.
pub fn archive_key(date: NaiveDate, run_label: &str, model: &str, file_name: &str) -> String {
    format!(
        "{ARCHIVES_PREFIX}/{}/{run_label}_{model}/{file_name}",
        date.format("%Y-%m-%d")
    )
}

/// Parse an archive key back into an index entry.
///
/// Keys may carry the `archives/` prefix. The run folder is split on its
/// last underscore, so labels like `forecast_18h` keep their own underscores.
pub fn parse_archive_key(key: &str, base_url: &str) -> Option<ForecastEntry> {
    let relative = key
        .strip_prefix(ARCHIVES_PREFIX)
        .and_then(|k| k.strip_prefix('/'))
        .unwrap_or(key);
    let parts: Vec<&str> = relative.split('/').collect();
    if parts.len() < 3 {
        return None;
    }
    NaiveDate::parse_from_str(parts[0], "%Y-%m-%d").ok()?;

    let (run_type, model) = parts[1]
        .rsplit_once('_')
        .unwrap_or((parts[1], "unknown"));

    Some(ForecastEntry {
        date: parts[0].to_string(),
        run_type: run_type.to_string(),
        model: model.to_string(),
        filename: parts[parts.len() - 1].to_string(),
        url: public_url(base_url, key),
    })
}

fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

/// Most recent forecast and reanalysis archive URLs.
///
/// `forecasts` must already be sorted newest first.
pub fn latest_links(forecasts: &[ForecastEntry]) -> NetworkLinks {
    let find = |prefix: &str| {
        forecasts
            .iter()
            .find(|f| f.run_type.to_lowercase().starts_with(prefix))
            .map(|f| f.url.clone())
    };
    NetworkLinks {
        latest_forecast_kmz: find("forecast"),
        latest_reanalysis_kmz: find("reanalysis"),
    }
}

/// Bucket-shaped store for run artifacts.
///
/// Layout:
/// - `archives/<YYYY-MM-DD>/<label>_<model>/<file>.zip`
/// - `<YYYY-MM-DD>/status_<label>_<model>.json`
/// - `index.json` and `latest.kml` at the root
pub trait Publisher: Send + Sync {
    /// Copy `local` to `dest`, returning its public URL.
    fn upload_file(&self, local: &Path, dest: &str) -> Result<String, PublishError>;

    fn upload_status(&self, status: &RunStatus, date: NaiveDate) -> Result<(), PublishError>;

    /// Rebuild `index.json` from what is currently stored.
    fn update_index(&self, now: DateTime<Utc>) -> Result<BucketIndex, PublishError>;

    /// Drop date folders older than `days_to_keep` days before `today`.
    fn cleanup_old_forecasts(&self, days_to_keep: i64, today: NaiveDate) -> Result<usize, PublishError>;
}

/// A bucket mirrored onto a local directory.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    root: PathBuf,
    public_url_base: String,
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>, public_url_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_url_base: public_url_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, dest: &str) -> Result<PathBuf, PublishError> {
        let dest = dest.trim_start_matches('/');
        if dest.is_empty() || dest.split('/').any(|part| part == "..") {
            return Err(PublishError::InvalidDestination(dest.to_string()));
        }
        Ok(self.root.join(dest))
    }

    fn write_object(&self, dest: &str, contents: &[u8]) -> Result<PathBuf, PublishError> {
        let path = self.resolve(dest)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Every stored key, `/`-separated and sorted.
    fn keys(&self) -> Result<Vec<String>, PublishError> {
        let mut keys = Vec::new();
        if self.root.exists() {
            collect_keys(&self.root, &self.root, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    fn recent_statuses(
        &self,
        keys: &[String],
        today: NaiveDate,
    ) -> BTreeMap<String, RunStatus> {
        let mut statuses = BTreeMap::new();
        for key in keys {
            let Some((date_dir, file)) = key.split_once('/') else {
                continue;
            };
            if !(file.starts_with("status_") && file.ends_with(".json")) {
                continue;
            }
            let Ok(date) = NaiveDate::parse_from_str(date_dir, "%Y-%m-%d") else {
                continue;
            };
            if (today - date).num_days() > STATUS_LOOKBACK_DAYS {
                continue;
            }

            let parsed = fs::read_to_string(self.root.join(key))
                .map_err(PublishError::from)
                .and_then(|json| Ok(serde_json::from_str::<RunStatus>(&json)?));
            match parsed {
                Ok(status) => {
                    statuses.insert(
                        format!("{}_{}_{}", date_dir, status.run_type, status.model),
                        status,
                    );
                }
                Err(e) => warn!("Skipping unreadable status {}: {}", key, e),
            }
        }
        statuses
    }
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_keys(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

impl Publisher for LocalPublisher {
    #[instrument(skip(self, local), fields(local = %local.display()))]
    fn upload_file(&self, local: &Path, dest: &str) -> Result<String, PublishError> {
        if !local.exists() {
            return Err(PublishError::MissingSource(local.to_path_buf()));
        }
        let target = self.resolve(dest)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &target)?;
        info!("Uploaded: {} -> {}", local.display(), dest);
        Ok(public_url(&self.public_url_base, dest))
    }

    fn upload_status(&self, status: &RunStatus, date: NaiveDate) -> Result<(), PublishError> {
        let json = serde_json::to_string_pretty(status)?;
        self.write_object(&status.key(date), json.as_bytes())?;
        debug!("Status {:?} recorded for {}_{}", status.status, status.run_type, status.model);
        Ok(())
    }

    #[instrument(skip(self))]
    fn update_index(&self, now: DateTime<Utc>) -> Result<BucketIndex, PublishError> {
        let keys = self.keys()?;

        let mut forecasts: Vec<ForecastEntry> = keys
            .iter()
            .filter(|k| k.ends_with(".zip"))
            .filter_map(|k| parse_archive_key(k, &self.public_url_base))
            .collect();
        forecasts.sort_by(|a, b| {
            (&b.date, &b.run_type, &b.model).cmp(&(&a.date, &a.run_type, &a.model))
        });

        let index = BucketIndex {
            updated: now,
            base_url: self.public_url_base.clone(),
            description_header: "This is an automatically generated index of available forecasts."
                .to_string(),
            kml_network_links: latest_links(&forecasts),
            statuses: self.recent_statuses(&keys, now.date_naive()),
            forecasts,
        };

        self.write_object(INDEX_FILE, serde_json::to_string_pretty(&index)?.as_bytes())?;
        self.write_object(NETWORK_LINK_FILE, network_link_kml(&self.public_url_base).as_bytes())?;
        info!(
            "Index updated: {} forecast(s), {} status record(s)",
            index.forecasts.len(),
            index.statuses.len()
        );
        Ok(index)
    }

    fn cleanup_old_forecasts(&self, days_to_keep: i64, today: NaiveDate) -> Result<usize, PublishError> {
        let mut removed = 0;
        for parent in [self.root.clone(), self.root.join(ARCHIVES_PREFIX)] {
            if !parent.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&parent)? {
                let path = entry?.path();
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };
                let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
                    continue;
                };
                if path.is_dir() && (today - date).num_days() > days_to_keep {
                    info!("Deleting old prefix: {}", path.display());
                    fs::remove_dir_all(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// KML that points Google Earth at the stable "latest" layers.
pub fn network_link_kml(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>Keystone Wind Forecasts</name>
    <NetworkLink>
      <name>Latest Forecast</name>
      <Link>
        <href>{base}/latest/HRRR_Forecast.kml</href>
        <refreshMode>onInterval</refreshMode>
        <refreshInterval>3600</refreshInterval>
      </Link>
    </NetworkLink>
    <NetworkLink>
      <name>Latest Reanalysis</name>
      <Link>
        <href>{base}/latest/HRRR_Reanalysis.kml</href>
        <refreshMode>onInterval</refreshMode>
        <refreshInterval>3600</refreshInterval>
      </Link>
    </NetworkLink>
  </Document>
</kml>
"#
    )
}
