use image::error::ImageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Frame extraction failed: {0}")]
    Extraction(String),
    #[error("Watermark removal failed: {0}")]
    Removal(String),
    #[error("Video assembly failed: {0}")]
    Assembly(String),
    #[error("{0}")]
    Validation(String),
    #[error("Another operation is still running ({0})")]
    Busy(&'static str),
    #[error("Cannot {command} while {stage}")]
    InvalidState { command: &'static str, stage: &'static str },
    #[error("No video selected")]
    NoSource,
    #[error("Session was reset before the operation finished")]
    Discarded,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("FFmpeg is not available on this system")]
    FFmpegNotAvailable,
    #[error("Failed to process image: {0}")]
    Image(#[from] ImageError),
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failures of an external collaborator move the pipeline into its error
    /// stage; everything else is reported to the caller and leaves the
    /// pipeline where it was.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(self, Error::Extraction(_) | Error::Removal(_) | Error::Assembly(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
