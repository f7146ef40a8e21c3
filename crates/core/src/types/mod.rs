//! Shared identifier and error types used across every component.

mod error;
mod ids;

pub use error::{
    ChunkStoreError, CoreError, DispatcherError, ErrorKind, PipelineError, PreflightError,
    QueueError, ReasoningError, ToolError,
};
pub use ids::{AuditId, ChunkIndex, JobId, PreflightId, SessionId};
