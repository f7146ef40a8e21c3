//! Reasoning journal: durable session/step/checkpoint storage, following the
//! same `rusqlite::Connection` behind a `tokio::sync::Mutex` pattern as
//! `preflight::SqlitePreflightStore` and `queue::SqliteJobQueue`.

use async_trait::async_trait;
use chrono::Utc;

use crate::reasoning::loop_types::{
    ReasoningCheckpoint, ReasoningSession, ReasoningStep, SessionStatus,
};
use crate::types::{ReasoningError, SessionId};

#[async_trait]
pub trait ReasoningJournal: Send + Sync {
    async fn create_session(
        &self,
        task_description: String,
        user_id: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<ReasoningSession, ReasoningError>;

    async fn get_session(&self, id: SessionId) -> Result<ReasoningSession, ReasoningError>;

    async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), ReasoningError>;

    /// Appends a step, enforcing strict `stepNumber` monotonicity per
    /// session (§8 property 7): `step.step_number` must equal the session's
    /// current `total_steps + 1`.
    async fn append_step(&self, step: ReasoningStep) -> Result<(), ReasoningError>;

    async fn list_steps(&self, session_id: SessionId) -> Result<Vec<ReasoningStep>, ReasoningError>;

    async fn upsert_checkpoint(&self, checkpoint: ReasoningCheckpoint) -> Result<(), ReasoningError>;

    async fn latest_checkpoint(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ReasoningCheckpoint>, ReasoningError>;
}

/// Pure in-memory journal used when persistence is disabled or as the
/// fallback path described in §4.6 step 4.
pub struct InMemoryReasoningJournal {
    sessions: parking_lot::Mutex<std::collections::HashMap<SessionId, ReasoningSession>>,
    steps: parking_lot::Mutex<std::collections::HashMap<SessionId, Vec<ReasoningStep>>>,
    checkpoints: parking_lot::Mutex<std::collections::HashMap<SessionId, ReasoningCheckpoint>>,
}

impl Default for InMemoryReasoningJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReasoningJournal {
    pub fn new() -> Self {
        Self {
            sessions: parking_lot::Mutex::new(std::collections::HashMap::new()),
            steps: parking_lot::Mutex::new(std::collections::HashMap::new()),
            checkpoints: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl ReasoningJournal for InMemoryReasoningJournal {
    async fn create_session(
        &self,
        task_description: String,
        user_id: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<ReasoningSession, ReasoningError> {
        let now = Utc::now();
        let session = ReasoningSession {
            id: SessionId::new(),
            task_description,
            status: SessionStatus::Active,
            user_id,
            total_steps: 0,
            total_tokens: 0,
            created_at: now,
            updated_at: now,
            metadata,
        };
        self.sessions.lock().insert(session.id, session.clone());
        self.steps.lock().insert(session.id, Vec::new());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<ReasoningSession, ReasoningError> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ReasoningError::SessionNotFound(id))
    }

    async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), ReasoningError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&id).ok_or(ReasoningError::SessionNotFound(id))?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn append_step(&self, step: ReasoningStep) -> Result<(), ReasoningError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&step.session_id)
            .ok_or(ReasoningError::SessionNotFound(step.session_id))?;
        if step.step_number != session.total_steps + 1 {
            return Err(ReasoningError::StepConflict(step.session_id));
        }
        session.total_steps += 1;
        session.total_tokens += step.token_usage;
        session.updated_at = Utc::now();
        self.steps
            .lock()
            .entry(step.session_id)
            .or_default()
            .push(step);
        Ok(())
    }

    async fn list_steps(&self, session_id: SessionId) -> Result<Vec<ReasoningStep>, ReasoningError> {
        Ok(self.steps.lock().get(&session_id).cloned().unwrap_or_default())
    }

    async fn upsert_checkpoint(&self, checkpoint: ReasoningCheckpoint) -> Result<(), ReasoningError> {
        self.checkpoints.lock().insert(checkpoint.session_id, checkpoint);
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ReasoningCheckpoint>, ReasoningError> {
        Ok(self.checkpoints.lock().get(&session_id).cloned())
    }
}

#[cfg(feature = "cron")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use tokio::sync::Mutex;

    pub struct SqliteReasoningJournal {
        conn: Mutex<Connection>,
    }

    impl SqliteReasoningJournal {
        pub fn open(path: &str) -> Result<Self, ReasoningError> {
            let conn = Connection::open(path).map_err(|e| ReasoningError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self { conn: Mutex::new(conn) })
        }

        pub fn open_in_memory() -> Result<Self, ReasoningError> {
            let conn = Connection::open_in_memory().map_err(|e| ReasoningError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self { conn: Mutex::new(conn) })
        }

        fn init_schema(conn: &Connection) -> Result<(), ReasoningError> {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS reasoning_sessions (
                    id TEXT PRIMARY KEY,
                    task_description TEXT NOT NULL,
                    status TEXT NOT NULL,
                    user_id TEXT,
                    total_steps INTEGER NOT NULL,
                    total_tokens INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    metadata TEXT
                 );
                 CREATE TABLE IF NOT EXISTS reasoning_steps (
                    session_id TEXT NOT NULL,
                    step_number INTEGER NOT NULL,
                    reasoning TEXT NOT NULL,
                    tool_called TEXT,
                    tool_input TEXT,
                    token_usage INTEGER NOT NULL,
                    PRIMARY KEY (session_id, step_number)
                 );
                 CREATE TABLE IF NOT EXISTS reasoning_checkpoints (
                    session_id TEXT NOT NULL,
                    step_number INTEGER NOT NULL,
                    context_snapshot TEXT NOT NULL,
                    last_successful_tool TEXT,
                    recovery_strategies TEXT NOT NULL,
                    PRIMARY KEY (session_id, step_number)
                 );",
            )
            .map_err(|e| ReasoningError::Storage(e.to_string()))?;
            Ok(())
        }

        fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<ReasoningSession> {
            let status: String = row.get("status")?;
            let metadata_json: Option<String> = row.get("metadata")?;
            Ok(ReasoningSession {
                id: row
                    .get::<_, String>("id")?
                    .parse()
                    .unwrap_or_else(|_| SessionId::new()),
                task_description: row.get("task_description")?,
                status: match status.as_str() {
                    "completed" => SessionStatus::Completed,
                    "failed" => SessionStatus::Failed,
                    "paused" => SessionStatus::Paused,
                    _ => SessionStatus::Active,
                },
                user_id: row.get("user_id")?,
                total_steps: row.get::<_, i64>("total_steps")? as u32,
                total_tokens: row.get::<_, i64>("total_tokens")? as u64,
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
                metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
            })
        }

        fn status_str(status: SessionStatus) -> &'static str {
            match status {
                SessionStatus::Active => "active",
                SessionStatus::Completed => "completed",
                SessionStatus::Failed => "failed",
                SessionStatus::Paused => "paused",
            }
        }
    }

    #[async_trait]
    impl ReasoningJournal for SqliteReasoningJournal {
        async fn create_session(
            &self,
            task_description: String,
            user_id: Option<String>,
            metadata: Option<serde_json::Value>,
        ) -> Result<ReasoningSession, ReasoningError> {
            let now = Utc::now();
            let session = ReasoningSession {
                id: SessionId::new(),
                task_description,
                status: SessionStatus::Active,
                user_id,
                total_steps: 0,
                total_tokens: 0,
                created_at: now,
                updated_at: now,
                metadata,
            };
            let metadata_json = session
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO reasoning_sessions (
                    id, task_description, status, user_id, total_steps,
                    total_tokens, created_at, updated_at, metadata
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    session.id.to_string(),
                    session.task_description,
                    Self::status_str(session.status),
                    session.user_id,
                    session.total_steps as i64,
                    session.total_tokens as i64,
                    session.created_at,
                    session.updated_at,
                    metadata_json,
                ],
            )
            .map_err(|e| ReasoningError::Storage(e.to_string()))?;

            Ok(session)
        }

        async fn get_session(&self, id: SessionId) -> Result<ReasoningSession, ReasoningError> {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT * FROM reasoning_sessions WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_session,
            )
            .optional()
            .map_err(|e| ReasoningError::Storage(e.to_string()))?
            .ok_or(ReasoningError::SessionNotFound(id))
        }

        async fn update_session_status(
            &self,
            id: SessionId,
            status: SessionStatus,
        ) -> Result<(), ReasoningError> {
            let conn = self.conn.lock().await;
            let affected = conn
                .execute(
                    "UPDATE reasoning_sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![Self::status_str(status), Utc::now(), id.to_string()],
                )
                .map_err(|e| ReasoningError::Storage(e.to_string()))?;
            if affected == 0 {
                return Err(ReasoningError::SessionNotFound(id));
            }
            Ok(())
        }

        async fn append_step(&self, step: ReasoningStep) -> Result<(), ReasoningError> {
            let conn = self.conn.lock().await;
            let current_total: i64 = conn
                .query_row(
                    "SELECT total_steps FROM reasoning_sessions WHERE id = ?1",
                    params![step.session_id.to_string()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| ReasoningError::Storage(e.to_string()))?
                .ok_or(ReasoningError::SessionNotFound(step.session_id))?;

            if step.step_number as i64 != current_total + 1 {
                return Err(ReasoningError::StepConflict(step.session_id));
            }

            let tool_input_json = step
                .tool_input
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            conn.execute(
                "INSERT INTO reasoning_steps (
                    session_id, step_number, reasoning, tool_called, tool_input, token_usage
                 ) VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    step.session_id.to_string(),
                    step.step_number as i64,
                    step.reasoning,
                    step.tool_called,
                    tool_input_json,
                    step.token_usage as i64,
                ],
            )
            .map_err(|e| ReasoningError::Storage(e.to_string()))?;

            conn.execute(
                "UPDATE reasoning_sessions
                 SET total_steps = total_steps + 1, total_tokens = total_tokens + ?1, updated_at = ?2
                 WHERE id = ?3",
                params![step.token_usage as i64, Utc::now(), step.session_id.to_string()],
            )
            .map_err(|e| ReasoningError::Storage(e.to_string()))?;

            Ok(())
        }

        async fn list_steps(&self, session_id: SessionId) -> Result<Vec<ReasoningStep>, ReasoningError> {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM reasoning_steps WHERE session_id = ?1 ORDER BY step_number ASC",
                )
                .map_err(|e| ReasoningError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![session_id.to_string()], |row| {
                    let tool_input_json: Option<String> = row.get("tool_input")?;
                    Ok(ReasoningStep {
                        session_id,
                        step_number: row.get::<_, i64>("step_number")? as u32,
                        reasoning: row.get("reasoning")?,
                        tool_called: row.get("tool_called")?,
                        tool_input: tool_input_json.and_then(|s| serde_json::from_str(&s).ok()),
                        token_usage: row.get::<_, i64>("token_usage")? as u64,
                    })
                })
                .map_err(|e| ReasoningError::Storage(e.to_string()))?;

            let mut steps = Vec::new();
            for row in rows {
                steps.push(row.map_err(|e| ReasoningError::Storage(e.to_string()))?);
            }
            Ok(steps)
        }

        async fn upsert_checkpoint(&self, checkpoint: ReasoningCheckpoint) -> Result<(), ReasoningError> {
            let context_json = serde_json::to_string(&checkpoint.context_snapshot)?;
            let strategies_json = serde_json::to_string(&checkpoint.recovery_strategies)?;

            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO reasoning_checkpoints (
                    session_id, step_number, context_snapshot, last_successful_tool, recovery_strategies
                 ) VALUES (?1,?2,?3,?4,?5)
                 ON CONFLICT (session_id, step_number) DO UPDATE SET
                    context_snapshot = excluded.context_snapshot,
                    last_successful_tool = excluded.last_successful_tool,
                    recovery_strategies = excluded.recovery_strategies",
                params![
                    checkpoint.session_id.to_string(),
                    checkpoint.step_number as i64,
                    context_json,
                    checkpoint.last_successful_tool,
                    strategies_json,
                ],
            )
            .map_err(|e| ReasoningError::Storage(e.to_string()))?;

            Ok(())
        }

        async fn latest_checkpoint(
            &self,
            session_id: SessionId,
        ) -> Result<Option<ReasoningCheckpoint>, ReasoningError> {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT * FROM reasoning_checkpoints WHERE session_id = ?1
                 ORDER BY step_number DESC LIMIT 1",
                params![session_id.to_string()],
                |row| {
                    let context_json: String = row.get("context_snapshot")?;
                    let strategies_json: String = row.get("recovery_strategies")?;
                    Ok(ReasoningCheckpoint {
                        session_id,
                        step_number: row.get::<_, i64>("step_number")? as u32,
                        context_snapshot: serde_json::from_str(&context_json).unwrap_or_default(),
                        last_successful_tool: row.get("last_successful_tool")?,
                        recovery_strategies: serde_json::from_str(&strategies_json).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(|e| ReasoningError::Storage(e.to_string()))
        }
    }
}

#[cfg(feature = "cron")]
pub use sqlite::SqliteReasoningJournal;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn step_numbers_must_be_strictly_sequential() {
        let journal = InMemoryReasoningJournal::new();
        let session = journal
            .create_session("audit a repo".to_string(), None, None)
            .await
            .unwrap();

        journal
            .append_step(ReasoningStep {
                session_id: session.id,
                step_number: 1,
                reasoning: "thinking".to_string(),
                tool_called: None,
                tool_input: None,
                token_usage: 10,
            })
            .await
            .unwrap();

        let conflict = journal
            .append_step(ReasoningStep {
                session_id: session.id,
                step_number: 3,
                reasoning: "skipped ahead".to_string(),
                tool_called: None,
                tool_input: None,
                token_usage: 5,
            })
            .await;
        assert!(matches!(conflict, Err(ReasoningError::StepConflict(_))));
    }

    #[tokio::test]
    async fn session_totals_accumulate() {
        let journal = InMemoryReasoningJournal::new();
        let session = journal
            .create_session("audit a repo".to_string(), None, None)
            .await
            .unwrap();
        for i in 1..=3u32 {
            journal
                .append_step(ReasoningStep {
                    session_id: session.id,
                    step_number: i,
                    reasoning: format!("step {i}"),
                    tool_called: None,
                    tool_input: None,
                    token_usage: 100,
                })
                .await
                .unwrap();
        }
        let updated = journal.get_session(session.id).await.unwrap();
        assert_eq!(updated.total_steps, 3);
        assert_eq!(updated.total_tokens, 300);
    }
}
