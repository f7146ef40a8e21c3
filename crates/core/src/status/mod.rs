//! Status channel (C4): per-job progress, logs, plan snapshot, token usage,
//! and final report, broadcast to subscribers.
//!
//! Subscriptions are implemented with a `tokio::sync::watch` channel per
//! status row held in an in-process registry keyed by preflight id, the
//! same "latest value always available to a late joiner" pattern the
//! agent-runtime crate uses for its WebSocket coordinator sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::types::{JobId, PreflightId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProgress {
    pub worker_id: String,
    pub status: String,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub planner: u64,
    pub workers: u64,
    pub coordinator: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub preflight_id: PreflightId,
    pub job_id: Option<JobId>,
    pub user_id: Option<String>,
    pub tier: String,
    pub status: StatusState,
    pub progress: u8,
    pub logs: Vec<String>,
    pub current_step: Option<String>,
    pub worker_progress: Vec<WorkerProgress>,
    pub plan_data: Option<serde_json::Value>,
    pub token_usage: TokenUsage,
    pub report_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<u64>,
    pub actual_duration_seconds: Option<u64>,
}

impl StatusRecord {
    fn new(preflight_id: PreflightId, user_id: Option<String>, tier: String) -> Self {
        Self {
            preflight_id,
            job_id: None,
            user_id,
            tier,
            status: StatusState::Queued,
            progress: 0,
            logs: Vec::new(),
            current_step: None,
            worker_progress: Vec::new(),
            plan_data: None,
            token_usage: TokenUsage::default(),
            report_data: None,
            error_message: None,
            error_details: None,
            cancel_requested: false,
            started_at: None,
            completed_at: None,
            failed_at: None,
            estimated_duration_seconds: None,
            actual_duration_seconds: None,
        }
    }
}

#[async_trait]
pub trait StatusChannel: Send + Sync {
    /// Open a fresh status row on job claim, per §4.4.
    async fn open(&self, preflight_id: PreflightId, job_id: JobId, user_id: Option<String>, tier: String);

    /// Apply a mutation, appending `log_line` (if any) and updating `progress`
    /// and `current_step`. Mutations are observed by every subscriber in the
    /// order they're applied. Takes a boxed closure (rather than a generic)
    /// so the trait stays object-safe behind `Arc<dyn StatusChannel>`.
    async fn update(
        &self,
        preflight_id: PreflightId,
        log_line: Option<&str>,
        mutate: Box<dyn FnOnce(&mut StatusRecord) + Send>,
    );

    async fn get(&self, preflight_id: PreflightId) -> Option<StatusRecord>;

    /// Subscribe to live updates; the receiver always holds the latest
    /// snapshot, even for a subscriber that joins after completion.
    async fn subscribe(&self, preflight_id: PreflightId) -> Option<watch::Receiver<StatusRecord>>;

    async fn request_cancel(&self, preflight_id: PreflightId) -> bool;
}

/// In-process registry of status rows, each backed by a `watch` channel.
pub struct InMemoryStatusChannel {
    rows: DashMap<PreflightId, watch::Sender<StatusRecord>>,
}

impl Default for InMemoryStatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStatusChannel {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }
}

#[async_trait]
impl StatusChannel for InMemoryStatusChannel {
    async fn open(
        &self,
        preflight_id: PreflightId,
        job_id: JobId,
        user_id: Option<String>,
        tier: String,
    ) {
        let mut record = StatusRecord::new(preflight_id, user_id, tier);
        record.job_id = Some(job_id);
        record.status = StatusState::Processing;
        record.started_at = Some(Utc::now());
        let (tx, _rx) = watch::channel(record);
        self.rows.insert(preflight_id, tx);
    }

    async fn update(
        &self,
        preflight_id: PreflightId,
        log_line: Option<&str>,
        mutate: Box<dyn FnOnce(&mut StatusRecord) + Send>,
    ) {
        if let Some(tx) = self.rows.get(&preflight_id) {
            tx.send_modify(|record| {
                if let Some(line) = log_line {
                    record.logs.push(line.to_string());
                }
                mutate(record);
            });
        }
    }

    async fn get(&self, preflight_id: PreflightId) -> Option<StatusRecord> {
        self.rows.get(&preflight_id).map(|tx| tx.borrow().clone())
    }

    async fn subscribe(&self, preflight_id: PreflightId) -> Option<watch::Receiver<StatusRecord>> {
        self.rows.get(&preflight_id).map(|tx| tx.subscribe())
    }

    async fn request_cancel(&self, preflight_id: PreflightId) -> bool {
        if let Some(tx) = self.rows.get(&preflight_id) {
            tx.send_modify(|record| record.cancel_requested = true);
            true
        } else {
            false
        }
    }
}

pub type SharedStatusChannel = Arc<dyn StatusChannel>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscriber_sees_current_snapshot() {
        let channel = InMemoryStatusChannel::new();
        let preflight_id = PreflightId::new();
        channel
            .open(preflight_id, JobId::new(), None, "security".to_string())
            .await;
        channel
            .update(preflight_id, Some("planning"), Box::new(|r| r.progress = 10))
            .await;
        channel
            .update(
                preflight_id,
                Some("workers dispatched"),
                Box::new(|r| r.progress = 40),
            )
            .await;

        let rx = channel.subscribe(preflight_id).await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.progress, 40);
        assert_eq!(snapshot.logs, vec!["planning", "workers dispatched"]);
    }

    #[tokio::test]
    async fn cancel_request_is_observable() {
        let channel = InMemoryStatusChannel::new();
        let preflight_id = PreflightId::new();
        channel
            .open(preflight_id, JobId::new(), None, "security".to_string())
            .await;
        assert!(channel.request_cancel(preflight_id).await);
        let record = channel.get(preflight_id).await.unwrap();
        assert!(record.cancel_requested);
    }
}
