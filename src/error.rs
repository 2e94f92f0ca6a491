//! Error taxonomy for the pipeline.
//!
//! Every failure reaching the outer layer carries an [`ErrorKind`] and a
//! human-readable reason.

use crate::types::model::ModelKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors produced by the pipeline core.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No trained {kind} model for user {user_id}")]
    UntrainedModel { user_id: String, kind: ModelKind },

    #[error("A {kind} training run is already in progress for user {user_id}")]
    Conflict { user_id: String, kind: ModelKind },

    #[error("Training {kind} for user {user_id} exceeded the {budget_ms} ms budget")]
    Timeout {
        user_id: String,
        kind: ModelKind,
        budget_ms: u64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`PipelineError`], stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientData,
    UntrainedModel,
    Conflict,
    Timeout,
    Validation,
    NotFound,
    Internal,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InsufficientData(_) => ErrorKind::InsufficientData,
            PipelineError::UntrainedModel { .. } => ErrorKind::UntrainedModel,
            PipelineError::Conflict { .. } => ErrorKind::Conflict,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn untrained(user_id: &str, kind: ModelKind) -> Self {
        PipelineError::UntrainedModel {
            user_id: user_id.to_string(),
            kind,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InsufficientData => "insufficient_data",
            ErrorKind::UntrainedModel => "untrained_model",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
