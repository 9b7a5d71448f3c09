//! Layered error types, one enum per component (§7).
//!
//! The engine client raises concrete kinds; the manager enriches with project context; the
//! adapter catches and translates into result structures. Nothing below the HTTP façade ever
//! surfaces a raw `bollard`/`io` error to a caller.

use std::fmt;

/// Errors raised by the [`crate::engine::ContainerEngine`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("engine operation '{op}' failed: {reason}")]
    OperationFailed { op: &'static str, reason: String },

    #[error("exec timed out after {0:?}")]
    ExecTimeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn operation_failed(op: &'static str, reason: impl fmt::Display) -> Self {
        EngineError::OperationFailed {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by the [`crate::sandbox::manager::SandboxManager`] (§4.3).
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no sandbox for project '{project_id}'")]
    NotFound { project_id: String },

    #[error("sandbox for project '{project_id}' already exists")]
    AlreadyExists { project_id: String },

    #[error("port allocator exhausted for project '{project_id}'")]
    PortsExhausted { project_id: String },

    #[error("engine error while {op} on project '{project_id}': {source}")]
    Engine {
        project_id: String,
        op: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ManagerError {
    pub fn engine(project_id: impl Into<String>, op: &'static str, source: EngineError) -> Self {
        ManagerError::Engine {
            project_id: project_id.into(),
            op,
            source,
        }
    }
}

/// Errors surfaced by the [`crate::adapter::WorkspaceAdapter`] that must propagate rather than
/// collapse into a structured result (§4.4 "Failure discipline" — most adapter failures become
/// `Ok(None)` / `Ok(false)` / a result struct; this enum covers the remainder).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("local path error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(String),
}

/// Errors the HTTP façade maps onto status codes (§6.1, §7).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::NotFound { .. } => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Manager(ManagerError::NotFound { .. }) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Path/argument validation failure (§4.5, §7). Kept distinct from [`AdapterError`] because it
/// never carries an underlying cause — it is produced entirely by local checks before any
/// engine call is dispatched.
#[derive(Debug, thiserror::Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.0)
    }
}
