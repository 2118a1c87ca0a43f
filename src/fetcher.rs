use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDateTime;
use reqwest::Url;
use tracing::{debug, instrument, warn};

use crate::fetch_error::FetchError;

const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (station tabular scraper)"
);

/// Retry and pacing rules for tabular fetches.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_tries: usize,
    pub timeout: Duration,
    /// Delay before retry n is `backoff_base * 2^n`.
    pub backoff_base: Duration,
    /// Pause after every successful fetch.
    pub throttle: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            timeout: Duration::from_secs(20),
            backoff_base: Duration::from_millis(750),
            throttle: Duration::from_millis(600),
        }
    }
}

/// One station window on the tabular endpoint.
#[derive(Debug, Clone)]
pub struct TabularRequest {
    pub station: String,
    /// Window end in station-local civil time.
    pub end_local: NaiveDateTime,
    pub range_hours: u32,
    pub unit: String,
    pub area: String,
}

impl TabularRequest {
    pub fn new(station: impl Into<String>, end_local: NaiveDateTime, range_hours: u32) -> Self {
        Self {
            station: station.into(),
            end_local,
            range_hours,
            unit: "e".to_string(),
            area: "caic".to_string(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

#[derive(Clone)]
pub struct TabularFetcher {
    client: reqwest::Client,
    endpoint: String,
    policy: FetchPolicy,
}

impl TabularFetcher {
    pub fn new(endpoint: String, policy: FetchPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            policy,
        })
    }

    /// `?st=..&date=YYYY-MM-DD+HH&unit=..&area=..&range=..`
    pub fn build_url(&self, request: &TabularRequest) -> Result<Url, FetchError> {
        if request.range_hours == 0 {
            return Err(FetchError::InvalidRequest(
                "range_hours must be > 0".to_string(),
            ));
        }

        let date = request.end_local.format("%Y-%m-%d %H").to_string();
        let range = request.range_hours.to_string();

        Url::parse_with_params(
            &self.endpoint,
            &[
                ("st", request.station.as_str()),
                ("date", date.as_str()),
                ("unit", request.unit.as_str()),
                ("area", request.area.as_str()),
                ("range", range.as_str()),
            ],
        )
        .map_err(|e| FetchError::InvalidRequest(format!("{}: {e}", self.endpoint)))
    }

    /// Fetch the station page, retrying with exponential backoff.
    #[instrument(skip(self, request), fields(station = %request.station))]
    pub async fn fetch(&self, request: &TabularRequest) -> Result<String, FetchError> {
        let url = self.build_url(request)?;
        let attempts = self.policy.max_tries.max(1);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.policy.backoff_base)
            .with_factor(2.0)
            .with_max_times(attempts - 1);

        let text = (|| async { self.fetch_once(&url).await })
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .notify(|err: &FetchError, delay: Duration| {
                warn!(
                    station = %request.station,
                    error = %err,
                    "Fetch failed, retrying in {:?}",
                    delay
                );
            })
            .await
            .map_err(|e| FetchError::Exhausted {
                station: request.station.clone(),
                attempts,
                url: url.to_string(),
                source: Box::new(e),
            })?;

        // Throttle between requests
        if !self.policy.throttle.is_zero() {
            tokio::time::sleep(self.policy.throttle).await;
        }

        Ok(text)
    }

    async fn fetch_once(&self, url: &Url) -> Result<String, FetchError> {
        debug!("Sending HTTP request to {}", url);
        // Send request and check status
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);

        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }

        let text = response.text().await?;
        debug!("Retrieved text content, size: {} bytes", text.len());
        Ok(text)
    }
}
