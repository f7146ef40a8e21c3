//! Chunked result store (C2): transparent splitting/reassembly of large
//! JSON findings, so no single row ever has to hold an unbounded audit
//! result.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{AuditId, ChunkIndex, ChunkStoreError};

/// Inline threshold: serialized issue arrays at or under this size are kept
/// on the audit row itself.
pub const INLINE_THRESHOLD_BYTES: usize = 100 * 1024;
/// Upper bound a single chunk's serialized payload must stay under.
pub const MAX_CHUNK_BYTES: usize = 500 * 1024;
const INITIAL_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Issues,
    Summary,
    Metadata,
    RawData,
}

impl ChunkType {
    fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Issues => "issues",
            ChunkType::Summary => "summary",
            ChunkType::Metadata => "metadata",
            ChunkType::RawData => "raw_data",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "issues" => Some(ChunkType::Issues),
            "summary" => Some(ChunkType::Summary),
            "metadata" => Some(ChunkType::Metadata),
            "raw_data" => Some(ChunkType::RawData),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultChunk {
    pub audit_id: AuditId,
    pub chunk_type: ChunkType,
    pub chunk_index: ChunkIndex,
    pub data: serde_json::Value,
    pub data_size_bytes: u64,
    pub compressed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditResults {
    pub issues: Vec<serde_json::Value>,
    pub extra_data: serde_json::Value,
}

/// Input to create the single audit row a pipeline run owns (§3 Audit record),
/// before its issues/extraData are written through `store_audit_results`.
#[derive(Debug, Clone)]
pub struct NewAudit {
    pub user_id: Option<String>,
    pub repo_url: String,
    pub tier: String,
    pub health_score: u8,
    pub summary: String,
    pub total_tokens: u64,
    pub estimated_tokens: Option<u64>,
}

/// A prior audit for a repository, returned alongside a fresh report so
/// callers can render history/navigation (§4.5 Phase 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub id: AuditId,
    pub tier: String,
    pub health_score: u8,
    pub summary: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert the audit row itself, per §3. Must run before
    /// `store_audit_results` for the same id.
    async fn create_audit(&self, audit_id: AuditId, input: NewAudit) -> Result<(), ChunkStoreError>;

    /// Write (or overwrite) the stored results for an audit, per §4.2.
    /// Returns the number of chunks written, or `0` if kept inline.
    async fn store_audit_results(
        &self,
        audit_id: AuditId,
        issues: &[serde_json::Value],
        extra_data: &serde_json::Value,
    ) -> Result<u32, ChunkStoreError>;

    async fn load_audit_results(&self, audit_id: AuditId) -> Result<AuditResults, ChunkStoreError>;

    /// Whether results for this audit are chunked (vs inline).
    async fn is_chunked(&self, audit_id: AuditId) -> Result<bool, ChunkStoreError>;

    /// Prior audits for the same repository, newest first, for the
    /// coordinator's navigation list (§4.5 Phase 3).
    async fn list_for_repo(&self, repo_url: &str) -> Result<Vec<AuditSummary>, ChunkStoreError>;
}

/// Splits `issues` into batches whose serialized size never exceeds
/// `MAX_CHUNK_BYTES`, halving the batch size whenever a candidate batch
/// overflows it (down to one item, which is still written with a warning
/// rather than dropped).
pub fn split_into_chunks(issues: &[serde_json::Value]) -> Vec<Vec<serde_json::Value>> {
    let mut chunks = Vec::new();
    let mut remaining = issues;
    let mut batch_size = INITIAL_BATCH_SIZE;

    while !remaining.is_empty() {
        let mut size = batch_size.min(remaining.len()).max(1);
        loop {
            let candidate = &remaining[..size];
            let serialized_len = serde_json::to_vec(candidate).map(|v| v.len()).unwrap_or(0);
            if serialized_len <= MAX_CHUNK_BYTES || size == 1 {
                if serialized_len > MAX_CHUNK_BYTES {
                    tracing::warn!(
                        chunk_size_bytes = serialized_len,
                        "single issue exceeds max chunk size; writing anyway"
                    );
                }
                chunks.push(candidate.to_vec());
                remaining = &remaining[size..];
                break;
            }
            size = (size / 2).max(1);
        }
        batch_size = size.max(1);
    }

    chunks
}

#[cfg(feature = "cron")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use tokio::sync::Mutex;

    pub struct SqliteChunkStore {
        conn: Mutex<Connection>,
    }

    impl SqliteChunkStore {
        pub fn open(path: &str) -> Result<Self, ChunkStoreError> {
            let conn =
                Connection::open(path).map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        pub fn open_in_memory() -> Result<Self, ChunkStoreError> {
            let conn = Connection::open_in_memory()
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn init_schema(conn: &Connection) -> Result<(), ChunkStoreError> {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS audits (
                    id TEXT PRIMARY KEY,
                    user_id TEXT,
                    repo_url TEXT NOT NULL,
                    tier TEXT NOT NULL,
                    health_score REAL NOT NULL,
                    summary TEXT NOT NULL,
                    issues TEXT,
                    extra_data TEXT,
                    total_tokens INTEGER NOT NULL,
                    estimated_tokens INTEGER,
                    results_chunked INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS result_chunks (
                    audit_id TEXT NOT NULL,
                    chunk_type TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    data TEXT NOT NULL,
                    data_size_bytes INTEGER NOT NULL,
                    compressed INTEGER NOT NULL,
                    PRIMARY KEY (audit_id, chunk_type, chunk_index)
                 );",
            )
            .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            Ok(())
        }
    }

    #[async_trait]
    impl ChunkStore for SqliteChunkStore {
        async fn create_audit(&self, audit_id: AuditId, input: NewAudit) -> Result<(), ChunkStoreError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO audits (
                    id, user_id, repo_url, tier, health_score, summary, issues, extra_data,
                    total_tokens, estimated_tokens, results_chunked, created_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,NULL,NULL,?7,?8,0,?9)",
                params![
                    audit_id.to_string(),
                    input.user_id,
                    input.repo_url,
                    input.tier,
                    input.health_score as f64,
                    input.summary,
                    input.total_tokens as i64,
                    input.estimated_tokens.map(|t| t as i64),
                    now,
                ],
            )
            .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            Ok(())
        }

        async fn store_audit_results(
            &self,
            audit_id: AuditId,
            issues: &[serde_json::Value],
            extra_data: &serde_json::Value,
        ) -> Result<u32, ChunkStoreError> {
            let conn = self.conn.lock().await;
            conn.execute(
                "DELETE FROM result_chunks WHERE audit_id = ?1",
                params![audit_id.to_string()],
            )
            .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;

            let serialized_len = serde_json::to_vec(issues)?.len();
            if serialized_len <= INLINE_THRESHOLD_BYTES {
                conn.execute(
                    "UPDATE audits SET issues = ?2, extra_data = ?3, results_chunked = 0 WHERE id = ?1",
                    params![
                        audit_id.to_string(),
                        serde_json::to_string(issues)?,
                        serde_json::to_string(extra_data)?,
                    ],
                )
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
                return Ok(0);
            }

            let chunks = split_into_chunks(issues);
            for (idx, chunk) in chunks.iter().enumerate() {
                let data = serde_json::to_string(chunk)?;
                conn.execute(
                    "INSERT INTO result_chunks (audit_id, chunk_type, chunk_index, data, data_size_bytes, compressed)
                     VALUES (?1, 'issues', ?2, ?3, ?4, 0)",
                    params![audit_id.to_string(), idx as i64, data, data.len() as i64],
                )
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            }

            if !extra_data.is_null() {
                let data = serde_json::to_string(extra_data)?;
                conn.execute(
                    "INSERT INTO result_chunks (audit_id, chunk_type, chunk_index, data, data_size_bytes, compressed)
                     VALUES (?1, 'metadata', 0, ?2, ?3, 0)",
                    params![audit_id.to_string(), data, data.len() as i64],
                )
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            }

            conn.execute(
                "UPDATE audits SET issues = NULL, extra_data = NULL, results_chunked = 1 WHERE id = ?1",
                params![audit_id.to_string()],
            )
            .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;

            Ok(chunks.len() as u32)
        }

        async fn load_audit_results(
            &self,
            audit_id: AuditId,
        ) -> Result<AuditResults, ChunkStoreError> {
            let conn = self.conn.lock().await;
            let chunked: i64 = conn
                .query_row(
                    "SELECT results_chunked FROM audits WHERE id = ?1",
                    params![audit_id.to_string()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?
                .ok_or(ChunkStoreError::NotFound(audit_id))?;

            if chunked == 0 {
                let (issues_json, extra_json): (Option<String>, Option<String>) = conn
                    .query_row(
                        "SELECT issues, extra_data FROM audits WHERE id = ?1",
                        params![audit_id.to_string()],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
                return Ok(AuditResults {
                    issues: issues_json
                        .map(|s| serde_json::from_str(&s))
                        .transpose()?
                        .unwrap_or_default(),
                    extra_data: extra_json
                        .map(|s| serde_json::from_str(&s))
                        .transpose()?
                        .unwrap_or(serde_json::Value::Null),
                });
            }

            let mut stmt = conn
                .prepare(
                    "SELECT chunk_type, chunk_index, data FROM result_chunks
                     WHERE audit_id = ?1 ORDER BY chunk_type, chunk_index ASC",
                )
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![audit_id.to_string()], |r| {
                    let chunk_type: String = r.get(0)?;
                    let data: String = r.get(2)?;
                    Ok((chunk_type, data))
                })
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;

            let mut issues = Vec::new();
            let mut extra_data = serde_json::Value::Null;
            let mut saw_issues_chunk = false;
            for row in rows {
                let (chunk_type, data) = row.map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
                match ChunkType::from_str(&chunk_type) {
                    Some(ChunkType::Issues) => {
                        saw_issues_chunk = true;
                        let mut batch: Vec<serde_json::Value> = serde_json::from_str(&data)?;
                        issues.append(&mut batch);
                    }
                    Some(ChunkType::Metadata) => {
                        extra_data = serde_json::from_str(&data)?;
                    }
                    _ => {}
                }
            }

            if !saw_issues_chunk {
                return Err(ChunkStoreError::Corrupted(
                    audit_id,
                    "marked chunked but no issues chunks found".to_string(),
                ));
            }

            Ok(AuditResults { issues, extra_data })
        }

        async fn is_chunked(&self, audit_id: AuditId) -> Result<bool, ChunkStoreError> {
            let conn = self.conn.lock().await;
            let chunked: i64 = conn
                .query_row(
                    "SELECT results_chunked FROM audits WHERE id = ?1",
                    params![audit_id.to_string()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?
                .ok_or(ChunkStoreError::NotFound(audit_id))?;
            Ok(chunked != 0)
        }

        async fn list_for_repo(&self, repo_url: &str) -> Result<Vec<AuditSummary>, ChunkStoreError> {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare(
                    "SELECT id, tier, health_score, summary, created_at FROM audits
                     WHERE repo_url = ?1 ORDER BY created_at DESC",
                )
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![repo_url], |r| {
                    let id: String = r.get(0)?;
                    let tier: String = r.get(1)?;
                    let health_score: f64 = r.get(2)?;
                    let summary: String = r.get(3)?;
                    let created_at: chrono::DateTime<chrono::Utc> = r.get(4)?;
                    Ok((id, tier, health_score, summary, created_at))
                })
                .map_err(|e| ChunkStoreError::Storage(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                let (id, tier, health_score, summary, created_at) =
                    row.map_err(|e| ChunkStoreError::Storage(e.to_string()))?;
                out.push(AuditSummary {
                    id: id.parse().unwrap_or_else(|_| AuditId::new()),
                    tier,
                    health_score: health_score.round() as u8,
                    summary,
                    created_at,
                });
            }
            Ok(out)
        }
    }
}

#[cfg(feature = "cron")]
pub use sqlite::SqliteChunkStore;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_issue_list_fits_one_chunk() {
        let issues: Vec<_> = (0..10).map(|i| json!({"id": i})).collect();
        let chunks = split_into_chunks(&issues);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 10);
    }

    #[test]
    fn large_issue_list_splits_and_bounds_each_chunk() {
        let big_string = "x".repeat(2000);
        let issues: Vec<_> = (0..1000)
            .map(|i| json!({"id": i, "description": big_string}))
            .collect();
        let chunks = split_into_chunks(&issues);
        assert!(chunks.len() >= 2);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 1000);
        for chunk in &chunks {
            let len = serde_json::to_vec(chunk).unwrap().len();
            assert!(len <= MAX_CHUNK_BYTES, "chunk of size {} exceeds bound", len);
        }
    }

    #[test]
    fn reassembly_preserves_order() {
        let issues: Vec<_> = (0..200).map(|i| json!({"id": i})).collect();
        let chunks = split_into_chunks(&issues);
        let mut reassembled = Vec::new();
        for chunk in chunks {
            reassembled.extend(chunk);
        }
        assert_eq!(reassembled, issues);
    }
}
