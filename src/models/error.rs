//! Caller-facing error types and the stable status code taxonomy.
//!
//! Each error maps to exactly one `StatusCode`. Transport layers translate codes,
//! never error strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::VersionRequest;
use super::status::TransitionError;
use crate::sequence::{ReaperError, SequenceError};

/// Stable result codes exposed to request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    ModelNameMissing,
    ModelVersionMissing,
    ModelVersionNotLoadedYet,
    ModelVersionNotLoadedAnymore,
    ModelLoadFailed,
    SequenceMissing,
    MaxSequenceNumberReached,
    RequestCancelled,
    InternalError,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ModelNameMissing => "MODEL_NAME_MISSING",
            Self::ModelVersionMissing => "MODEL_VERSION_MISSING",
            Self::ModelVersionNotLoadedYet => "MODEL_VERSION_NOT_LOADED_YET",
            Self::ModelVersionNotLoadedAnymore => "MODEL_VERSION_NOT_LOADED_ANYMORE",
            Self::ModelLoadFailed => "MODEL_LOAD_FAILED",
            Self::SequenceMissing => "SEQUENCE_MISSING",
            Self::MaxSequenceNumberReached => "MAX_SEQUENCE_NUMBER_REACHED",
            Self::RequestCancelled => "REQUEST_CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Human-readable message for client responses.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ModelNameMissing => "Model with requested name is not found",
            Self::ModelVersionMissing => "Model with requested version is not found",
            Self::ModelVersionNotLoadedYet => "Model with requested version is not loaded yet",
            Self::ModelVersionNotLoadedAnymore => "Model with requested version is retired",
            Self::ModelLoadFailed => "Model version failed to load",
            Self::SequenceMissing => "Sequence with provided ID does not exist",
            Self::MaxSequenceNumberReached => "Max sequence number has been reached",
            Self::RequestCancelled => "Request was cancelled",
            Self::InternalError => "Internal server error",
        }
    }

    /// Retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelVersionNotLoadedYet | Self::MaxSequenceNumberReached)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the registry, models and instances.
#[derive(Debug, Error)]
pub enum ServingError {
    #[error("Model not found: {name}")]
    ModelNameMissing { name: String },

    #[error("Model {name} has no version {version}")]
    ModelVersionMissing { name: String, version: VersionRequest },

    #[error("Model {name} version {version} is not loaded yet")]
    ModelVersionNotLoadedYet { name: String, version: u64 },

    #[error("Model {name} version {version} is not loaded anymore")]
    ModelVersionNotLoadedAnymore { name: String, version: u64 },

    #[error("Model {name} version {version} failed to load: {reason}")]
    LoadFailed { name: String, version: u64, reason: String },

    #[error("Request cancelled while waiting for {name} version {version}")]
    Cancelled { name: String, version: u64 },

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Reaper(#[from] ReaperError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServingError {
    pub fn code(&self) -> StatusCode {
        match self {
            Self::ModelNameMissing { .. } => StatusCode::ModelNameMissing,
            Self::ModelVersionMissing { .. } => StatusCode::ModelVersionMissing,
            Self::ModelVersionNotLoadedYet { .. } => StatusCode::ModelVersionNotLoadedYet,
            Self::ModelVersionNotLoadedAnymore { .. } => StatusCode::ModelVersionNotLoadedAnymore,
            Self::LoadFailed { .. } => StatusCode::ModelLoadFailed,
            Self::Cancelled { .. } => StatusCode::RequestCancelled,
            Self::Sequence(SequenceError::Missing(_)) => StatusCode::SequenceMissing,
            Self::Sequence(SequenceError::CapacityExceeded { .. }) => {
                StatusCode::MaxSequenceNumberReached
            }
            Self::Sequence(SequenceError::Closed) => StatusCode::ModelVersionNotLoadedAnymore,
            Self::Sequence(SequenceError::Stateless) => StatusCode::InternalError,
            Self::Reaper(_) | Self::Transition(_) | Self::Internal(_) => StatusCode::InternalError,
        }
    }

    /// Returns true if this error should be logged as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        !matches!(self.code(), StatusCode::InternalError | StatusCode::ModelLoadFailed)
    }
}
