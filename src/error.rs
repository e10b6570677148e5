//! Error taxonomy for the generation pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Wrong title/description/game count or malformed exercise content.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("missing unit(s) after reassembly: {0:?}")]
    MissingUnits(Vec<usize>),

    #[error("content rejected: {0}")]
    ContentSafety(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("generation service error: {0}")]
    Generation(String),

    #[error("auto-generation failed: {0}")]
    AutoGeneration(Box<PipelineError>),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::NotFound("row".into()),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Validation(format!("malformed JSON: {err}"))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
