use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
pub const GRIB_CACHE_RETENTION: Duration = Duration::from_secs(2 * 24 * 3600);

/// Subfolder of raw solver grids that is never archived.
const GRIDS_DIR: &str = "grids";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Zip every `.kmz` under `run_dir` into `<archive_dir>/<base_name>.zip`,
/// then delete `run_dir`.
///
/// Entries are stored relative to `run_dir` in sorted order so the same
/// inputs produce the same archive layout.
#[instrument(skip_all, fields(run_dir = %run_dir.display(), base_name = %base_name))]
pub fn archive_results(run_dir: &Path, archive_dir: &Path, base_name: &str) -> Result<PathBuf, ArchiveError> {
    fs::create_dir_all(archive_dir)?;
    let archive_path = archive_dir.join(format!("{base_name}.zip"));

    // Raw grids are never archived
    let grids = run_dir.join(GRIDS_DIR);
    if grids.exists() {
        fs::remove_dir_all(&grids)?;
    }

    let mut kmz_files = Vec::new();
    collect_kmz(run_dir, &mut kmz_files)?;
    kmz_files.sort();

    info!("Archiving {} file(s) to {}", kmz_files.len(), archive_path.display());
    let mut zip = ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in &kmz_files {
        let name = path
            .strip_prefix(run_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        zip.start_file(name, options)?;
        let mut reader = File::open(path)?;
        io::copy(&mut reader, &mut zip)?;
    }
    zip.finish()?;

    fs::remove_dir_all(run_dir)?;
    Ok(archive_path)
}

fn collect_kmz(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_kmz(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "kmz") {
            out.push(path);
        }
    }
    Ok(())
}

/// Delete plain files in `dir` last modified more than `max_age` before `now`.
///
/// A missing directory is not an error. Files that cannot be removed are
/// logged and skipped. Returns the number of files deleted.
pub fn enforce_retention(dir: &Path, max_age: Duration, now: SystemTime) -> Result<usize, ArchiveError> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        // Unknown mtimes count as fresh
        if age <= max_age {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Deleted expired file {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Failed to delete {}: {}", entry.path().display(), e),
        }
    }

    if removed > 0 {
        info!("Retention removed {} file(s) from {}", removed, dir.display());
    }
    Ok(removed)
}
