#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("Failed to fetch tabular data for {station} after {attempts} tries: {url}")]
    Exhausted {
        station: String,
        attempts: usize,
        url: String,
        #[source]
        source: Box<FetchError>,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
