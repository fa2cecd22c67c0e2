use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Organization model '{model}' is unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("Organization model fetch failed: {0}")]
    ModelFetch(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid similarity threshold {0}: must be between 0 and 100")]
    InvalidThreshold(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not extract text from {}: {reason}", .path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Report rendering failed: {0}")]
    Render(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Fatal configuration failures abort an ingestion before the bulk
    /// directory is touched.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelUnavailable { .. }
                | PipelineError::ModelFetch(_)
                | PipelineError::InvalidThreshold(_)
                | PipelineError::InvalidConfig(_)
        )
    }

    pub fn is_archive_error(&self) -> bool {
        matches!(self, PipelineError::Archive(_) | PipelineError::Zip(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
