//! Output module
//!
//! - Destination path resolution
//! - Transcoding through an external `ffmpeg`

mod ffmpeg;

pub use ffmpeg::FfmpegTranscoder;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::processing::TransformPlan;
use std::path::{Path, PathBuf};

/// One planned file conversion
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub plan: TransformPlan,
}

impl TranscodeJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, plan: TransformPlan) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            plan,
        }
    }
}

/// Trait for transcode backends
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Run the job to completion, writing `job.destination`
    async fn transcode(&self, job: &TranscodeJob) -> Result<()>;
}

/// Absolute output path for `source`.
///
/// The file name is the source stem plus the configured suffix and
/// extension. It goes to `output_folder` when set, next to the source when a
/// suffix keeps the names apart, and to the home directory otherwise.
pub fn destination_for(source: &Path, config: &Config) -> Result<PathBuf> {
    let stem = source.file_stem().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", source.display()),
        ))
    })?;

    let folder = match &config.output_folder {
        Some(folder) => folder.clone(),
        None if !config.output_suffix.is_empty() => source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        None => dirs::home_dir().ok_or_else(|| {
            Error::Config("no output folder set and no home directory found".into())
        })?,
    };

    let mut name = stem.to_os_string();
    name.push(&config.output_suffix);
    name.push(&config.output_ext);
    let destination = std::path::absolute(folder.join(name))?;

    if destination == std::path::absolute(source)? || same_file(source, &destination) {
        return Err(Error::DestinationConflict(destination));
    }
    Ok(destination)
}

/// Make sure `destination` may be written: refuse to clobber an existing file
/// unless `overwrite`, and create missing parent folders.
pub fn prepare_destination(destination: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && destination.exists() {
        return Err(Error::OutputExists(destination.to_path_buf()));
    }
    if let Some(parent) = destination.parent() {
        // tolerates folders created concurrently by other jobs
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
