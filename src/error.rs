//! Component-boundary error type.
//!
//! Every manager (task graph, workflow engine, registry, party scheduler,
//! messaging bus, pipeline executor, persistence) returns `GobbyError` at
//! its public boundary. Internal plumbing uses `anyhow::Result` and is
//! converted to `GobbyError::Internal` only where a result crosses back out
//! through a tool or hook response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GobbyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    CycleDetected,
    DepthExceeded,
    InputTooLarge,
    Timeout,
    Conflict,
    BackendUnavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum GobbyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("agent depth would exceed {max}: {context}")]
    DepthExceeded { max: u32, context: String },

    #[error("input too large ({size} bytes, cap {cap}): {hint}")]
    InputTooLarge { size: usize, cap: usize, hint: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GobbyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::CycleDetected(_) => ErrorKind::CycleDetected,
            Self::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            Self::InputTooLarge { .. } => ErrorKind::InputTooLarge,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for GobbyError {
    fn from(err: rusqlite::Error) -> Self {
        GobbyError::Internal(format!("sqlite: {err}"))
    }
}

impl From<anyhow::Error> for GobbyError {
    fn from(err: anyhow::Error) -> Self {
        GobbyError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GobbyError {
    fn from(err: serde_json::Error) -> Self {
        GobbyError::Internal(format!("json: {err}"))
    }
}

/// Wire shape for the tool-protocol and hook-ingress error surface (§6.1/§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&GobbyError> for ErrorResponse {
    fn from(err: &GobbyError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
