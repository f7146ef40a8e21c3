//! `auditd-core`: a durable job queue paired with an LLM-guided three-phase
//! static-analysis pipeline, plus a standalone reasoning loop and tool
//! registry any other component in this repo can build on.
//!
//! Modules map directly to the components named in the design doc (C1-C8):
//! preflight snapshots, the job queue, the pipeline phases, the status
//! channel, the chunked result store, the reasoning loop, the tool
//! registry, and the dispatcher that ties the queue to the pipeline.

pub mod config;
pub mod dispatcher;
pub mod pipeline;
pub mod preflight;
pub mod queue;
pub mod reasoning;
pub mod results;
pub mod status;
pub mod tools;
pub mod types;

pub use config::CoreConfig;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use pipeline::{run_pipeline, PipelineContext};
pub use queue::JobQueue;
pub use results::ChunkStore;
pub use status::StatusChannel;
pub use types::{CoreError, ErrorKind};

#[cfg(feature = "cron")]
pub use preflight::SqlitePreflightStore;
#[cfg(feature = "cron")]
pub use queue::SqliteJobQueue;
#[cfg(feature = "cron")]
pub use reasoning::journal::SqliteReasoningJournal;
#[cfg(feature = "cron")]
pub use results::sqlite::SqliteChunkStore;

#[cfg(feature = "http-api")]
pub mod http_api;
