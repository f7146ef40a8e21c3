//! Job queue (C3): a durable FIFO-by-priority queue with leasing, retry,
//! and stale-lease recovery.
//!
//! Grounded directly on `scheduler::job_store::SqliteJobStore` from the
//! agent-runtime crate this repo descends from: a single `rusqlite`
//! connection behind a `tokio::sync::Mutex`, WAL mode, JSON sub-fields.
//! SQLite has no `SELECT ... FOR UPDATE SKIP LOCKED`; atomic, non-contending
//! claim is instead implemented with a `BEGIN IMMEDIATE` transaction that
//! performs selection and transition together, giving the same
//! at-most-one-claimant guarantee (see DESIGN.md).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{JobId, PreflightId, QueueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub preflight_id: PreflightId,
    pub user_id: Option<String>,
    pub tier: String,
    pub status: JobStatus,
    pub priority: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_stack: Option<String>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed_today: u64,
    pub failed_today: u64,
    pub avg_processing_seconds: f64,
    pub oldest_pending_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveJobSummary {
    pub preflight_id: PreflightId,
    pub repo_url: String,
    pub tier: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}

/// Emitted on successful enqueue; implementations may additionally wake the
/// dispatcher out-of-band. Notification failure must never fail the enqueue.
#[derive(Debug, Clone, Serialize)]
pub struct NewJobSignal {
    pub job_id: JobId,
    pub preflight_id: PreflightId,
    pub tier: String,
    pub priority: u8,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        preflight_id: PreflightId,
        user_id: Option<String>,
        tier: String,
        input: serde_json::Value,
        priority: u8,
        max_attempts: u32,
    ) -> Result<JobId, QueueError>;

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>, QueueError>;
    async fn claim_batch(
        &self,
        worker_id: &str,
        n: u32,
        lease: Duration,
    ) -> Result<Vec<Job>, QueueError>;

    async fn complete(&self, job_id: JobId, output: serde_json::Value) -> Result<(), QueueError>;
    async fn fail(
        &self,
        job_id: JobId,
        error: &str,
        stack: Option<&str>,
    ) -> Result<(), QueueError>;
    async fn cancel(&self, job_id: JobId, user_id: &str) -> Result<bool, QueueError>;

    async fn recover_stale(&self) -> Result<u64, QueueError>;
    async fn reset_stuck_pending(&self) -> Result<u64, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
    async fn active_for_user(&self, user_id: &str) -> Result<Vec<ActiveJobSummary>, QueueError>;

    async fn get(&self, job_id: JobId) -> Result<Job, QueueError>;
}

/// `scheduledAt = now + 2^attempts minutes`, per §4.3 retry policy.
pub fn backoff_delay(attempts: u32) -> chrono::Duration {
    let minutes = 2i64.saturating_pow(attempts.min(20));
    chrono::Duration::minutes(minutes)
}

#[cfg(feature = "cron")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use tokio::sync::Mutex;

    pub struct SqliteJobQueue {
        conn: Mutex<Connection>,
    }

    impl SqliteJobQueue {
        pub fn open(path: &str) -> Result<Self, QueueError> {
            let conn = Connection::open(path).map_err(|e| QueueError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        pub fn open_in_memory() -> Result<Self, QueueError> {
            let conn =
                Connection::open_in_memory().map_err(|e| QueueError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn init_schema(conn: &Connection) -> Result<(), QueueError> {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    preflight_id TEXT NOT NULL UNIQUE,
                    user_id TEXT,
                    tier TEXT NOT NULL,
                    status TEXT NOT NULL,
                    priority INTEGER NOT NULL,
                    attempts INTEGER NOT NULL,
                    max_attempts INTEGER NOT NULL,
                    scheduled_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    worker_id TEXT,
                    locked_until TEXT,
                    last_error TEXT,
                    error_stack TEXT,
                    input TEXT NOT NULL,
                    output TEXT,
                    repo_url TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_jobs_claim
                    ON jobs(status, scheduled_at) WHERE status = 'pending';
                 CREATE INDEX IF NOT EXISTS idx_jobs_locked ON jobs(status, locked_until);
                 CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id, status);",
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(())
        }

        fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
            let input_json: String = row.get("input")?;
            let output_json: Option<String> = row.get("output")?;
            Ok(Job {
                id: row
                    .get::<_, String>("id")?
                    .parse()
                    .unwrap_or_else(|_| JobId::new()),
                preflight_id: row
                    .get::<_, String>("preflight_id")?
                    .parse()
                    .unwrap_or_else(|_| PreflightId::new()),
                user_id: row.get("user_id")?,
                tier: row.get("tier")?,
                status: JobStatus::from_str(&row.get::<_, String>("status")?),
                priority: row.get::<_, i64>("priority")? as u8,
                attempts: row.get::<_, i64>("attempts")? as u32,
                max_attempts: row.get::<_, i64>("max_attempts")? as u32,
                scheduled_at: row.get("scheduled_at")?,
                started_at: row.get("started_at")?,
                completed_at: row.get("completed_at")?,
                worker_id: row.get("worker_id")?,
                locked_until: row.get("locked_until")?,
                last_error: row.get("last_error")?,
                error_stack: row.get("error_stack")?,
                input: serde_json::from_str(&input_json).unwrap_or(serde_json::Value::Null),
                output: output_json
                    .map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
            })
        }
    }

    #[async_trait]
    impl JobQueue for SqliteJobQueue {
        async fn enqueue(
            &self,
            preflight_id: PreflightId,
            user_id: Option<String>,
            tier: String,
            input: serde_json::Value,
            priority: u8,
            max_attempts: u32,
        ) -> Result<JobId, QueueError> {
            let mut conn = self.conn.lock().await;
            let tx = conn
                .transaction()
                .map_err(|e| QueueError::Storage(e.to_string()))?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT status FROM jobs WHERE preflight_id = ?1",
                    params![preflight_id.to_string()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| QueueError::Storage(e.to_string()))?;

            if let Some(status) = existing {
                let status = JobStatus::from_str(&status);
                if matches!(status, JobStatus::Pending | JobStatus::Processing) {
                    return Err(QueueError::AlreadyQueued);
                }
            }

            let job_id = JobId::new();
            let now = Utc::now();
            tx.execute(
                "INSERT INTO jobs (
                    id, preflight_id, user_id, tier, status, priority, attempts,
                    max_attempts, scheduled_at, input, created_at, updated_at
                 ) VALUES (?1,?2,?3,?4,'pending',?5,0,?6,?7,?8,?9,?9)
                 ON CONFLICT(preflight_id) DO UPDATE SET
                    id=excluded.id, user_id=excluded.user_id, tier=excluded.tier,
                    status='pending', priority=excluded.priority, attempts=0,
                    max_attempts=excluded.max_attempts, scheduled_at=excluded.scheduled_at,
                    started_at=NULL, completed_at=NULL, worker_id=NULL, locked_until=NULL,
                    last_error=NULL, error_stack=NULL, input=excluded.input, output=NULL,
                    updated_at=excluded.updated_at",
                params![
                    job_id.to_string(),
                    preflight_id.to_string(),
                    user_id,
                    tier,
                    priority as i64,
                    max_attempts as i64,
                    now,
                    serde_json::to_string(&input)?,
                    now,
                ],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;

            tx.commit().map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(job_id)
        }

        async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
            let claimed = self.claim_batch(worker_id, 1, lease).await?;
            Ok(claimed.into_iter().next())
        }

        async fn claim_batch(
            &self,
            worker_id: &str,
            n: u32,
            lease: Duration,
        ) -> Result<Vec<Job>, QueueError> {
            let mut conn = self.conn.lock().await;
            // BEGIN IMMEDIATE acquires the writer lock up front so no other
            // connection can select the same rows before this transaction
            // transitions them out of `pending` (§4.3a).
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| QueueError::Storage(e.to_string()))?;

            let result = (|| -> Result<Vec<Job>, QueueError> {
                let now = Utc::now();
                let locked_until = now + chrono::Duration::from_std(lease).unwrap_or_default();

                let ids: Vec<String> = {
                    let mut stmt = conn
                        .prepare(
                            "SELECT id FROM jobs
                             WHERE status = 'pending' AND scheduled_at <= ?1 AND attempts < max_attempts
                             ORDER BY priority DESC, scheduled_at ASC
                             LIMIT ?2",
                        )
                        .map_err(|e| QueueError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map(params![now, n as i64], |r| r.get::<_, String>(0))
                        .map_err(|e| QueueError::Storage(e.to_string()))?;
                    rows.collect::<Result<Vec<_>, _>>()
                        .map_err(|e| QueueError::Storage(e.to_string()))?
                };

                let mut jobs = Vec::with_capacity(ids.len());
                for id in ids {
                    conn.execute(
                        "UPDATE jobs SET status = 'processing', worker_id = ?2,
                            locked_until = ?3, started_at = COALESCE(started_at, ?4),
                            attempts = attempts + 1, updated_at = ?4
                         WHERE id = ?1",
                        params![id, worker_id, locked_until, now],
                    )
                    .map_err(|e| QueueError::Storage(e.to_string()))?;

                    let job = conn
                        .query_row(
                            "SELECT * FROM jobs WHERE id = ?1",
                            params![id],
                            Self::row_to_job,
                        )
                        .map_err(|e| QueueError::Storage(e.to_string()))?;
                    jobs.push(job);
                }
                Ok(jobs)
            })();

            match &result {
                Ok(_) => {
                    conn.execute_batch("COMMIT")
                        .map_err(|e| QueueError::Storage(e.to_string()))?;
                }
                Err(_) => {
                    let _ = conn.execute_batch("ROLLBACK");
                }
            }

            result
        }

        async fn complete(&self, job_id: JobId, output: serde_json::Value) -> Result<(), QueueError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let affected = conn
                .execute(
                    "UPDATE jobs SET status = 'completed', output = ?2, completed_at = ?3,
                        worker_id = NULL, locked_until = NULL, updated_at = ?3 WHERE id = ?1",
                    params![job_id.to_string(), serde_json::to_string(&output)?, now],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            if affected == 0 {
                return Err(QueueError::NotFound(job_id));
            }
            Ok(())
        }

        async fn fail(
            &self,
            job_id: JobId,
            error: &str,
            stack: Option<&str>,
        ) -> Result<(), QueueError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let (attempts, max_attempts): (i64, i64) = conn
                .query_row(
                    "SELECT attempts, max_attempts FROM jobs WHERE id = ?1",
                    params![job_id.to_string()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(|e| QueueError::Storage(e.to_string()))?
                .ok_or(QueueError::NotFound(job_id))?;

            if attempts < max_attempts {
                let scheduled_at = now + backoff_delay(attempts as u32);
                conn.execute(
                    "UPDATE jobs SET status = 'pending', last_error = ?2, error_stack = ?3,
                        worker_id = NULL, locked_until = NULL, scheduled_at = ?4, updated_at = ?5
                     WHERE id = ?1",
                    params![job_id.to_string(), error, stack, scheduled_at, now],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            } else {
                conn.execute(
                    "UPDATE jobs SET status = 'failed', last_error = ?2, error_stack = ?3,
                        worker_id = NULL, locked_until = NULL, completed_at = ?4, updated_at = ?4
                     WHERE id = ?1",
                    params![job_id.to_string(), error, stack, now],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            }
            Ok(())
        }

        async fn cancel(&self, job_id: JobId, user_id: &str) -> Result<bool, QueueError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let affected = conn
                .execute(
                    "UPDATE jobs SET status = 'cancelled', updated_at = ?3
                     WHERE id = ?1 AND (user_id = ?2 OR user_id IS NULL)
                       AND status IN ('pending', 'processing')",
                    params![job_id.to_string(), user_id, now],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(affected > 0)
        }

        async fn recover_stale(&self) -> Result<u64, QueueError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let affected = conn
                .execute(
                    "UPDATE jobs SET status = 'pending', worker_id = NULL, locked_until = NULL,
                        updated_at = ?1
                     WHERE status = 'processing' AND locked_until < ?1",
                    params![now],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(affected as u64)
        }

        async fn reset_stuck_pending(&self) -> Result<u64, QueueError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let cutoff = now - chrono::Duration::minutes(15);
            let affected = conn
                .execute(
                    "UPDATE jobs SET attempts = 0, worker_id = NULL, updated_at = ?2
                     WHERE status = 'pending' AND attempts < max_attempts AND updated_at < ?2
                       AND created_at < ?2",
                    params![now, cutoff],
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(affected as u64)
        }

        async fn stats(&self) -> Result<QueueStats, QueueError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let today_start = now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc();

            let pending: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = 'pending'",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let processing: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = 'processing'",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let completed_today: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = 'completed' AND completed_at >= ?1",
                    params![today_start],
                    |r| r.get(0),
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let failed_today: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = 'failed' AND completed_at >= ?1",
                    params![today_start],
                    |r| r.get(0),
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let avg_processing_seconds: f64 = conn
                .query_row(
                    "SELECT COALESCE(AVG(
                        (julianday(completed_at) - julianday(started_at)) * 86400.0
                     ), 0.0) FROM jobs WHERE status = 'completed' AND started_at IS NOT NULL",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let oldest_pending_minutes: f64 = conn
                .query_row(
                    "SELECT COALESCE(MIN(
                        (julianday(?1) - julianday(scheduled_at)) * 1440.0
                     ), 0.0) FROM jobs WHERE status = 'pending'",
                    params![now],
                    |r| r.get(0),
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;

            Ok(QueueStats {
                pending: pending as u64,
                processing: processing as u64,
                completed_today: completed_today as u64,
                failed_today: failed_today as u64,
                avg_processing_seconds,
                oldest_pending_minutes,
            })
        }

        async fn active_for_user(&self, user_id: &str) -> Result<Vec<ActiveJobSummary>, QueueError> {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare(
                    "SELECT preflight_id, tier, status, created_at, input FROM jobs
                     WHERE user_id = ?1 AND status IN ('pending', 'processing')
                     ORDER BY created_at DESC",
                )
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![user_id], |r| {
                    let preflight_id: String = r.get(0)?;
                    let tier: String = r.get(1)?;
                    let status: String = r.get(2)?;
                    let created_at: DateTime<Utc> = r.get(3)?;
                    let input: String = r.get(4)?;
                    Ok((preflight_id, tier, status, created_at, input))
                })
                .map_err(|e| QueueError::Storage(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                let (preflight_id, tier, status, created_at, input) =
                    row.map_err(|e| QueueError::Storage(e.to_string()))?;
                let input_value: serde_json::Value =
                    serde_json::from_str(&input).unwrap_or(serde_json::Value::Null);
                let repo_url = input_value
                    .get("repoUrl")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                out.push(ActiveJobSummary {
                    preflight_id: preflight_id.parse().unwrap_or_else(|_| PreflightId::new()),
                    repo_url,
                    tier,
                    status: JobStatus::from_str(&status),
                    progress: 0,
                    created_at,
                });
            }
            Ok(out)
        }

        async fn get(&self, job_id: JobId) -> Result<Job, QueueError> {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                Self::row_to_job,
            )
            .optional()
            .map_err(|e| QueueError::Storage(e.to_string()))?
            .ok_or(QueueError::NotFound(job_id))
        }
    }
}

#[cfg(feature = "cron")]
pub use sqlite::SqliteJobQueue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonic_and_exponential() {
        assert_eq!(backoff_delay(0), chrono::Duration::minutes(1));
        assert_eq!(backoff_delay(1), chrono::Duration::minutes(2));
        assert_eq!(backoff_delay(2), chrono::Duration::minutes(4));
        assert!(backoff_delay(3) > backoff_delay(2));
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn enqueue_claim_complete_round_trip() {
        let queue = sqlite::SqliteJobQueue::open_in_memory().unwrap();
        let preflight_id = PreflightId::new();
        let job_id = queue
            .enqueue(
                preflight_id,
                Some("user-1".to_string()),
                "security".to_string(),
                serde_json::json!({"repoUrl": "https://example.com/r"}),
                5,
                3,
            )
            .await
            .unwrap();

        let claimed = queue
            .claim("worker-1", Duration::from_secs(300))
            .await
            .unwrap()
            .expect("job should be claimable");
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.status, JobStatus::Processing);

        assert!(queue
            .claim("worker-2", Duration::from_secs(300))
            .await
            .unwrap()
            .is_none());

        queue.complete(job_id, serde_json::json!({"ok": true})).await.unwrap();
        let job = queue.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn duplicate_enqueue_for_same_preflight_rejected() {
        let queue = sqlite::SqliteJobQueue::open_in_memory().unwrap();
        let preflight_id = PreflightId::new();
        queue
            .enqueue(preflight_id, None, "security".to_string(), serde_json::json!({}), 5, 3)
            .await
            .unwrap();

        let second = queue
            .enqueue(preflight_id, None, "security".to_string(), serde_json::json!({}), 5, 3)
            .await;
        assert!(matches!(second, Err(QueueError::AlreadyQueued)));
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn fail_with_remaining_attempts_reschedules() {
        let queue = sqlite::SqliteJobQueue::open_in_memory().unwrap();
        let preflight_id = PreflightId::new();
        let job_id = queue
            .enqueue(preflight_id, None, "security".to_string(), serde_json::json!({}), 5, 3)
            .await
            .unwrap();
        queue.claim("w1", Duration::from_secs(60)).await.unwrap();
        queue.fail(job_id, "boom", None).await.unwrap();

        let job = queue.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn fail_past_max_attempts_is_terminal() {
        let queue = sqlite::SqliteJobQueue::open_in_memory().unwrap();
        let preflight_id = PreflightId::new();
        let job_id = queue
            .enqueue(preflight_id, None, "security".to_string(), serde_json::json!({}), 5, 1)
            .await
            .unwrap();
        queue.claim("w1", Duration::from_secs(60)).await.unwrap();
        queue.fail(job_id, "boom", None).await.unwrap();

        let job = queue.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
