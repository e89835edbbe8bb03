//! Error types for fluoromask

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fluoromask operations
pub type Result<T> = std::result::Result<T, Error>;

/// fluoromask error type
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("Not a video: {0}")]
    NotAVideo(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    // Profile errors
    #[error("No matching profile found for {0}")]
    NoMatchingProfile(String),

    #[error("No region of interest defined in profile '{0}'")]
    NoRegionOfInterest(String),

    // Geometry errors
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    // Output errors
    #[error("Destination is the source file: {}", .0.display())]
    DestinationConflict(PathBuf),

    #[error("Output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Mask image error: {0}")]
    Image(#[from] image::ImageError),

    // External process errors
    #[error("{program} failed (code {code:?}): {stderr}")]
    ExternalProcess {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn external(program: impl Into<String>, code: Option<i32>, stderr: impl Into<String>) -> Self {
        Error::ExternalProcess {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Check if this error only affects the current input file
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }

    /// Check if the input was not applicable (as opposed to a failed attempt)
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Error::NotAVideo(_)
                | Error::NoMatchingProfile(_)
                | Error::NoRegionOfInterest(_)
                | Error::OutputExists(_)
        )
    }
}
