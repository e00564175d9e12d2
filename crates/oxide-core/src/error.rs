//! Error types for Oxide CI admission control.

use crate::ids::PipelineId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Pipeline errors
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(PipelineId),

    #[error("Unknown auto_cancel_on_new_commit value: {0}")]
    UnknownCancellationPolicy(String),

    #[error("Unknown pipeline source: {0}")]
    UnknownPipelineSource(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Corrupt ancestry for pipeline {pipeline}: {reason}")]
    CorruptAncestry { pipeline: PipelineId, reason: String },

    // Runner errors
    #[error("Runner catalog unavailable: {0}")]
    RunnerCatalog(String),

    // Collaborator errors
    #[error("Feature toggle lookup failed: {0}")]
    FeatureToggle(String),

    #[error("Pipeline processing failed: {0}")]
    Processing(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
