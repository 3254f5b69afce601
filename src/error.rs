//! The daemon-wide error taxonomy.
//!
//! Component errors converge on [`DaemonError`], which knows its JSON-RPC
//! error code so the IPC boundary can answer every failure with a structured
//! `{code, message, data}` object.

use crate::ipc::protocol::codes;
use crate::persist::StoreError;
use serde_json::{json, Value};

/// Errors surfaced by request handlers.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Malformed or out-of-range input, rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("layout not found: {project}/{name}")]
    LayoutNotFound { project: String, name: String },

    /// The request is not allowed in the current state (e.g. navigating
    /// while workspace mode is inactive).
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// The compositor (or another collaborator) could not be reached.
    #[error("compositor error: {0}")]
    Transport(String),

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A handler or collaborator panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            DaemonError::Validation(_) => codes::VALIDATION_ERROR,
            DaemonError::ProjectNotFound(_) => codes::PROJECT_NOT_FOUND,
            DaemonError::LayoutNotFound { .. } => codes::LAYOUT_NOT_FOUND,
            DaemonError::StateConflict(_) => codes::STATE_CONFLICT,
            DaemonError::Transport(_) => codes::COMPOSITOR_UNAVAILABLE,
            DaemonError::AlreadyExists { .. } => codes::ALREADY_EXISTS,
            DaemonError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            DaemonError::InvalidParams(_) => codes::INVALID_PARAMS,
            DaemonError::Storage(_) | DaemonError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Structured detail for the `data` member of the error response.
    pub fn data(&self) -> Option<Value> {
        match self {
            DaemonError::ProjectNotFound(name) => Some(json!({ "project": name })),
            DaemonError::LayoutNotFound { project, name } => {
                Some(json!({ "project": project, "layout": name }))
            }
            DaemonError::AlreadyExists { kind, name } => {
                Some(json!({ "kind": kind, "name": name }))
            }
            DaemonError::MethodNotFound(method) => Some(json!({ "method": method })),
            _ => None,
        }
    }

    /// Convenience for wrapping any collaborator error as a transport error.
    pub fn transport(e: impl std::fmt::Display) -> Self {
        DaemonError::Transport(e.to_string())
    }
}
