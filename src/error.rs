use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::fetch_error::FetchError;
use crate::publish::PublishError;
use crate::solver::SolverError;
use crate::station_file::StationFileError;
use crate::tabular::TabularError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Tabular(#[from] TabularError),

    #[error(transparent)]
    StationFile(#[from] StationFileError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{count} station fetch failure(s). See manifest: {}", manifest.display())]
    StationFetchFailures { count: usize, manifest: PathBuf },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
