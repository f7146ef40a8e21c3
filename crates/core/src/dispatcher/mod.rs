//! Dispatcher (C8): the glue between the durable job queue and the
//! three-phase pipeline.
//!
//! Grounded on the agent-runtime crate's `scheduler::DefaultAgentScheduler`
//! (`tokio::time::interval` driving a loop selected against a shutdown
//! `Notify`, `tracing` for every state transition) generalized from
//! scheduling in-process agents to claiming durable, possibly-remote jobs.
//! Two trigger paths wake the same loop body, both idempotent because
//! `ClaimBatch` only ever takes rows that are still `pending` (§4.8):
//!
//! 1. **On-insert** — `notify_new_job()` fires the loop's `Notify` the
//!    moment a job is enqueued.
//! 2. **Timer** — a periodic tick invokes it regardless, so a missed or
//!    racy on-insert notification is never fatal.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio::time::interval;

use crate::pipeline::{run_pipeline, PipelineContext};
use crate::queue::{Job, JobQueue};
use crate::status::StatusChannel;
use crate::types::DispatcherError;

/// Bound on jobs run concurrently out of a single claimed batch, independent
/// of the per-job worker fan-out bound in `pipeline::worker`.
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_id: String,
    /// Jobs claimed per invocation; §4.8 recommends a small batch so a
    /// single dispatcher instance doesn't starve others under horizontal
    /// scaling.
    pub batch_size: u32,
    pub lease: Duration,
    /// Timer-trigger period; §4.8 recommends <= 1 minute.
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("dispatcher-{}", uuid::Uuid::new_v4()),
            batch_size: 5,
            lease: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// A single run of the dispatch loop's body (§4.8): recover stale leases,
/// claim a batch, run each claimed job's pipeline, and settle it.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    pipeline_ctx: Arc<PipelineContext>,
    config: DispatcherConfig,
    wake: Arc<Notify>,
}

/// Outcome of one invocation, for logging/metrics at the caller's option.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub recovered_stale: u64,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        pipeline_ctx: Arc<PipelineContext>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            pipeline_ctx,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle for the on-insert trigger: call this right after a successful
    /// `JobQueue::enqueue`. Best-effort — a dropped notification is made up
    /// for by the timer trigger, so this never returns a `Result`.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn notify_new_job(&self) {
        self.wake.notify_one();
    }

    /// Runs `RecoverStale -> ClaimBatch -> per-job pipeline` once. Safe to
    /// call concurrently from multiple dispatcher instances: `ClaimBatch` is
    /// the only thing that mutates shared state up front, and it claims each
    /// row exactly once via the queue's `BEGIN IMMEDIATE` transaction.
    pub async fn run_once(&self) -> Result<DispatchSummary, DispatcherError> {
        let recovered_stale = self.queue.recover_stale().await?;
        if recovered_stale > 0 {
            tracing::info!(count = recovered_stale, "recovered stale job leases");
        }

        let jobs = self
            .queue
            .claim_batch(&self.config.worker_id, self.config.batch_size, self.config.lease)
            .await?;
        if jobs.is_empty() {
            return Ok(DispatchSummary {
                recovered_stale,
                ..Default::default()
            });
        }
        tracing::info!(count = jobs.len(), worker_id = %self.config.worker_id, "claimed job batch");

        let max_concurrent = self.config.max_concurrent_jobs;
        let outcomes: Vec<bool> = stream::iter(jobs.into_iter().map(|job| self.run_job(job)))
            .buffer_unordered(max_concurrent)
            .collect()
            .await;

        let completed = outcomes.iter().filter(|ok| **ok).count();
        let failed = outcomes.len() - completed;
        Ok(DispatchSummary {
            recovered_stale,
            claimed: outcomes.len(),
            completed,
            failed,
        })
    }

    /// Runs one job's pipeline end to end and settles the queue row.
    /// Returns `true` on success, `false` on failure — never propagates an
    /// error, since one job's failure must never abort the rest of the
    /// batch.
    async fn run_job(&self, job: Job) -> bool {
        self.pipeline_ctx
            .status
            .open(job.preflight_id, job.id, job.user_id.clone(), job.tier.clone())
            .await;

        match run_pipeline(&self.pipeline_ctx, job.preflight_id, &job.tier, job.user_id.clone()).await {
            Ok(output) => {
                if let Err(e) = self.queue.complete(job.id, output).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark job complete after a successful pipeline run");
                    return false;
                }
                tracing::info!(job_id = %job.id, preflight_id = %job.preflight_id, "job completed");
                true
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(job_id = %job.id, error = %message, "pipeline run failed");
                self.pipeline_ctx
                    .status
                    .update(
                        job.preflight_id,
                        Some(&message),
                        Box::new({
                            let message = message.clone();
                            move |r| {
                                r.status = crate::status::StatusState::Failed;
                                r.error_message = Some(message);
                                r.failed_at = Some(chrono::Utc::now());
                            }
                        }),
                    )
                    .await;
                if let Err(queue_err) = self.queue.fail(job.id, &message, None).await {
                    tracing::error!(job_id = %job.id, error = %queue_err, "failed to record job failure in the queue");
                }
                false
            }
        }
    }

    /// Runs the dispatch loop until `shutdown` fires, driven by both trigger
    /// paths: the timer (`poll_interval`) and `notify_new_job()`/the shared
    /// `wake_handle()`.
    pub async fn run_forever(self: Arc<Self>, shutdown: Arc<Notify>) {
        let mut ticker = interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.notified() => {
                    tracing::info!("dispatcher shutting down");
                    break;
                }
            }

            match self.run_once().await {
                Ok(summary) if summary.claimed > 0 => {
                    tracing::info!(
                        claimed = summary.claimed,
                        completed = summary.completed,
                        failed = summary.failed,
                        "dispatch cycle finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "dispatch cycle failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletionConfig, CompletionProvider, CoreConfig, TierPromptTable};
    use crate::preflight::{sqlite::SqlitePreflightStore, NewPreflight, PreflightStore};
    use crate::queue::sqlite::SqliteJobQueue;
    use crate::results::sqlite::SqliteChunkStore;
    use crate::status::InMemoryStatusChannel;
    use std::time::Duration as StdDuration;

    fn test_config() -> Arc<CoreConfig> {
        Arc::new(CoreConfig {
            database_path: ":memory:".to_string(),
            completion: CompletionConfig {
                provider: CompletionProvider::Anthropic,
                api_key: String::new(),
                base_url: "https://api.anthropic.com/v1".to_string(),
                model: "test".to_string(),
            },
            default_lease: StdDuration::from_secs(300),
            default_max_attempts: 3,
            http_bind_address: "0.0.0.0:0".to_string(),
            tier_prompts: TierPromptTable::builtin_defaults(),
            api_token: None,
        })
    }

    async fn seed_preflight(store: &dyn PreflightStore) -> crate::types::PreflightId {
        use crate::preflight::FetchStrategy;

        let preflight = store
            .create(NewPreflight {
                repo_url: "https://github.com/acme/widgets".to_string(),
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
                default_branch: "main".to_string(),
                repo_map: Vec::new(),
                stats: serde_json::json!({}),
                fingerprint: "test-fingerprint".to_string(),
                is_private: false,
                fetch_strategy: FetchStrategy::Public,
                user_id: None,
                github_account_id: None,
            })
            .await
            .unwrap();
        preflight.id
    }

    #[tokio::test]
    async fn run_once_with_no_completion_client_still_settles_jobs() {
        let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let preflight_store = Arc::new(SqlitePreflightStore::open_in_memory().unwrap());
        let preflight_id = seed_preflight(preflight_store.as_ref()).await;

        queue
            .enqueue(preflight_id, None, "security".to_string(), serde_json::json!({}), 5, 3)
            .await
            .unwrap();

        let pipeline_ctx = Arc::new(PipelineContext {
            preflight_store,
            chunk_store: Arc::new(SqliteChunkStore::open_in_memory().unwrap()),
            status: Arc::new(InMemoryStatusChannel::new()),
            completion_client: None,
            config: test_config(),
        });

        let dispatcher = Dispatcher::new(
            queue.clone(),
            pipeline_ctx,
            DispatcherConfig {
                worker_id: "test-worker".to_string(),
                batch_size: 5,
                lease: StdDuration::from_secs(300),
                poll_interval: StdDuration::from_secs(30),
                max_concurrent_jobs: 4,
            },
        );

        // The planner/workers degrade to placeholders without a completion
        // client, but the pipeline still runs to completion and the job
        // settles rather than staying `processing` forever.
        let summary = dispatcher.run_once().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn run_once_on_empty_queue_claims_nothing() {
        let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let preflight_store = Arc::new(SqlitePreflightStore::open_in_memory().unwrap());
        let pipeline_ctx = Arc::new(PipelineContext {
            preflight_store,
            chunk_store: Arc::new(SqliteChunkStore::open_in_memory().unwrap()),
            status: Arc::new(InMemoryStatusChannel::new()),
            completion_client: None,
            config: test_config(),
        });
        let dispatcher = Dispatcher::new(queue, pipeline_ctx, DispatcherConfig::default());

        let summary = dispatcher.run_once().await.unwrap();
        assert_eq!(summary.claimed, 0);
    }

    #[tokio::test]
    async fn unknown_tier_fails_the_job_rather_than_panicking() {
        let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let preflight_store = Arc::new(SqlitePreflightStore::open_in_memory().unwrap());
        let preflight_id = seed_preflight(preflight_store.as_ref()).await;

        queue
            .enqueue(preflight_id, None, "not-a-real-tier".to_string(), serde_json::json!({}), 5, 1)
            .await
            .unwrap();

        let pipeline_ctx = Arc::new(PipelineContext {
            preflight_store,
            chunk_store: Arc::new(SqliteChunkStore::open_in_memory().unwrap()),
            status: Arc::new(InMemoryStatusChannel::new()),
            completion_client: None,
            config: test_config(),
        });
        let dispatcher = Dispatcher::new(
            queue.clone(),
            pipeline_ctx,
            DispatcherConfig {
                worker_id: "test-worker".to_string(),
                ..DispatcherConfig::default()
            },
        );

        let summary = dispatcher.run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
    }
}
