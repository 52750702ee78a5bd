//! Engine-level errors.

use crate::config::ConfigError;
use crate::generation::GenerationError;
use crate::model::{CampaignStatus, SheetError, StatusRegression};
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The generation service could not be reached, even after a retry.
    #[error("failed to generate {step}: {message}")]
    GenerationUnavailable { step: &'static str, message: String },

    /// The generation service kept returning output of the wrong shape.
    #[error("failed to generate {step}: malformed output: {message}")]
    MalformedOutput { step: &'static str, message: String },

    /// The generation service refused the request; it was not retried.
    #[error("failed to generate {step}: request rejected: {message}")]
    GenerationRejected { step: &'static str, message: String },

    /// A reference matched nothing and nothing could be generated for it.
    #[error("could not resolve '{0}'")]
    UnresolvedReference(String),

    #[error("cannot {operation} while campaign is {status}")]
    InvalidState {
        status: CampaignStatus,
        operation: &'static str,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("message is empty")]
    EmptyMessage,

    /// Another operation holds the speaking lease.
    #[error("{speaker} is already responding")]
    Busy { speaker: String },

    #[error("invalid character sheet: {0}")]
    InvalidPlayer(#[from] SheetError),

    #[error("repository error: {0}")]
    Repository(RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Attach the name of the generation step that failed.
    pub fn step(step: &'static str, err: GenerationError) -> Self {
        match err {
            GenerationError::Unavailable(message) => {
                EngineError::GenerationUnavailable { step, message }
            }
            GenerationError::MalformedOutput(message) => {
                EngineError::MalformedOutput { step, message }
            }
            GenerationError::Rejected(message) => EngineError::GenerationRejected { step, message },
        }
    }

    pub fn invalid_state(status: CampaignStatus, operation: &'static str) -> Self {
        EngineError::InvalidState { status, operation }
    }

    /// Whether a generation step failed.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            EngineError::GenerationUnavailable { .. }
                | EngineError::MalformedOutput { .. }
                | EngineError::GenerationRejected { .. }
        )
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            other => EngineError::Repository(other),
        }
    }
}

impl From<StatusRegression> for EngineError {
    fn from(err: StatusRegression) -> Self {
        EngineError::InvalidState {
            status: err.from,
            operation: "move the campaign backwards",
        }
    }
}

/// Attach a step name to generation results.
pub(crate) trait StepExt<T> {
    fn step(self, step: &'static str) -> Result<T, EngineError>;
}

impl<T> StepExt<T> for Result<T, GenerationError> {
    fn step(self, step: &'static str) -> Result<T, EngineError> {
        self.map_err(|e| EngineError::step(step, e))
    }
}
