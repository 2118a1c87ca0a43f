pub mod alignment;
pub mod archive;
pub mod config;
pub mod error;
pub mod fetch_error;
pub mod fetcher;
pub mod forecast_run;
pub mod manifest;
pub mod observations;
pub mod publish;
pub mod solver;
pub mod station_file;
pub mod station_inputs;
pub mod stations;
pub mod tabular;

pub use error::{PipelineError, Result};
