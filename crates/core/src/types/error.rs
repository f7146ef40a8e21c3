//! Component error taxonomy.
//!
//! Each component owns a `thiserror`-derived enum describing its own failure
//! modes; `CoreError` aggregates them with `#[from]` so a single type can
//! cross a module boundary (API handlers, the dispatcher) without losing the
//! original variant.

use thiserror::Error;

use crate::types::{AuditId, JobId, PreflightId, SessionId};

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("preflight {0} not found")]
    NotFound(PreflightId),
    #[error("a preflight already exists for this repository")]
    AlreadyExists,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("an active job already exists for this preflight")]
    AlreadyQueued,
    #[error("job {0} cannot be cancelled in its current state")]
    NotCancellable(JobId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("audit {0} not found")]
    NotFound(AuditId),
    #[error("chunk invariant violated for audit {0}: {reason}", reason = .1)]
    Corrupted(AuditId, String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    #[error(transparent)]
    ChunkStore(#[from] ChunkStoreError),
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
    #[error("completion request failed: {0}")]
    Completion(String),
    #[error("job cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("step number conflict in session {0}")]
    StepConflict(SessionId),
    #[error("human intervention required: {0}")]
    HumanNeeded(String),
    #[error("reasoning failed: {0}")]
    Failed(String),
    #[error("iteration budget exhausted after {0} iterations")]
    BudgetExhausted(u32),
    #[error("completion request failed: {0}")]
    Completion(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("permission denied: tool {tool} requires {required:?}, caller has {actual:?}")]
    PermissionDenied {
        tool: String,
        required: crate::tools::Permission,
        actual: crate::tools::Permission,
    },
    #[error("invalid input for tool {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("circuit open for tool {0}")]
    CircuitOpen(String),
    #[error("tool timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Top-level error aggregated at service boundaries (HTTP handlers, CLI).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    ChunkStore(#[from] ChunkStoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Classification used by HTTP handlers to pick a status code (§7).
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::Pipeline(PipelineError::UnknownTier(_)) => {
                ErrorKind::Validation
            }
            CoreError::Preflight(PreflightError::NotFound(_))
            | CoreError::Queue(QueueError::NotFound(_))
            | CoreError::ChunkStore(ChunkStoreError::NotFound(_))
            | CoreError::Reasoning(ReasoningError::SessionNotFound(_)) => ErrorKind::NotFound,
            CoreError::Preflight(PreflightError::AlreadyExists)
            | CoreError::Queue(QueueError::AlreadyQueued)
            | CoreError::Queue(QueueError::NotCancellable(_)) => ErrorKind::Conflict,
            CoreError::ChunkStore(ChunkStoreError::Corrupted(_, _)) => ErrorKind::Corruption,
            CoreError::Tool(ToolError::PermissionDenied { .. }) => ErrorKind::Permission,
            CoreError::Pipeline(PipelineError::Completion(_))
            | CoreError::Reasoning(ReasoningError::Completion(_))
            | CoreError::Tool(ToolError::Timeout(_))
            | CoreError::Tool(ToolError::CircuitOpen(_)) => ErrorKind::Transient,
            _ => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Permission,
    Transient,
    Corruption,
    Internal,
}
