use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::fetcher::FetchPolicy;

pub const DEFAULT_TABULAR_URL: &str = "https://stations.avalanche.state.co.us/tabular.php";
pub const DEFAULT_TIME_ZONE: &str = "America/Denver";

/// Process-wide settings, read once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub windninja_cli: PathBuf,
    pub tabular_url: String,
    pub station_time_zone: String,
    pub fetch_max_tries: usize,
    pub fetch_timeout_secs: u64,
    pub fetch_throttle_ms: u64,
    pub station_pacing_ms: u64,
    pub publish_enabled: bool,
    pub publish_dir: PathBuf,
    pub public_url_base: String,
    pub archive_retention_days: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let base_dir = env::var("BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Config {
            temp_dir: env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base_dir.join("temp")),
            archive_dir: env::var("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base_dir.join("archives")),
            windninja_cli: env::var("WINDNINJA_CLI")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("WindNinja_cli")),
            tabular_url: env::var("CAIC_TABULAR_URL")
                .unwrap_or_else(|_| DEFAULT_TABULAR_URL.to_string()),
            station_time_zone: env::var("STATION_TIME_ZONE")
                .unwrap_or_else(|_| DEFAULT_TIME_ZONE.to_string()),
            fetch_max_tries: env::var("FETCH_MAX_TRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            fetch_timeout_secs: env::var("FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            fetch_throttle_ms: env::var("FETCH_THROTTLE_MS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .unwrap_or(600),
            station_pacing_ms: env::var("STATION_PACING_MS")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .unwrap_or(200),
            publish_enabled: env::var("PUBLISH_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            publish_dir: env::var("PUBLISH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| base_dir.join("publish")),
            public_url_base: env::var("PUBLIC_URL_BASE").unwrap_or_default(),
            archive_retention_days: env::var("ARCHIVE_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
            base_dir,
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_tries: self.fetch_max_tries,
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            throttle: Duration::from_millis(self.fetch_throttle_ms),
            ..FetchPolicy::default()
        }
    }

    pub fn station_pacing(&self) -> Duration {
        Duration::from_millis(self.station_pacing_ms)
    }

    /// Solver configuration template for a named domain.
    pub fn domain_template(&self, domain: &str) -> PathBuf {
        let file = match domain {
            "large" => "keystone_template_large.cfg",
            _ => "keystone_template.cfg",
        };
        self.base_dir.join("config").join(file)
    }

    /// Directory under which the solver keeps its per-config case folders.
    pub fn solver_case_root(&self) -> PathBuf {
        self.base_dir.join("static_data")
    }

    pub fn grib_cache_dir(&self) -> PathBuf {
        self.temp_dir.join("grib_cache")
    }
}
