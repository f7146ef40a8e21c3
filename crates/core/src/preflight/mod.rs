//! Preflight store (C1): a durable snapshot of a repository sufficient to
//! run an audit without re-fetching the file list.
//!
//! Persistence follows the same pattern as `queue::SqliteJobQueue`: a single
//! `rusqlite::Connection` guarded by a `tokio::sync::Mutex`, opened in WAL
//! mode, with JSON-serialized sub-fields.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PreflightError, PreflightId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMapEntry {
    pub path: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FetchStrategy {
    Public,
    Authenticated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preflight {
    pub id: PreflightId,
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub default_branch: String,
    pub repo_map: Vec<RepoMapEntry>,
    pub stats: serde_json::Value,
    pub fingerprint: String,
    pub is_private: bool,
    pub fetch_strategy: FetchStrategy,
    pub github_account_id: Option<String>,
    pub token_valid: bool,
    pub user_id: Option<String>,
    pub file_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPreflight {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub default_branch: String,
    pub repo_map: Vec<RepoMapEntry>,
    pub stats: serde_json::Value,
    pub fingerprint: String,
    pub is_private: bool,
    pub fetch_strategy: FetchStrategy,
    pub user_id: Option<String>,
    pub github_account_id: Option<String>,
}

#[async_trait]
pub trait PreflightStore: Send + Sync {
    async fn create(&self, input: NewPreflight) -> Result<Preflight, PreflightError>;
    async fn get(&self, id: PreflightId) -> Result<Preflight, PreflightError>;
    async fn cleanup_expired(&self) -> Result<u64, PreflightError>;
}

#[cfg(feature = "cron")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use tokio::sync::Mutex;

    pub struct SqlitePreflightStore {
        pub(crate) conn: Mutex<Connection>,
    }

    impl SqlitePreflightStore {
        pub fn open(path: &str) -> Result<Self, PreflightError> {
            let conn = Connection::open(path)
                .map_err(|e| PreflightError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        pub fn open_in_memory() -> Result<Self, PreflightError> {
            let conn = Connection::open_in_memory()
                .map_err(|e| PreflightError::Storage(e.to_string()))?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn init_schema(conn: &Connection) -> Result<(), PreflightError> {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS preflights (
                    id TEXT PRIMARY KEY,
                    repo_url TEXT NOT NULL,
                    owner TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    default_branch TEXT NOT NULL,
                    repo_map TEXT NOT NULL,
                    stats TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    is_private INTEGER NOT NULL,
                    fetch_strategy TEXT NOT NULL,
                    github_account_id TEXT,
                    token_valid INTEGER NOT NULL,
                    user_id TEXT,
                    file_count INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                 );
                 CREATE UNIQUE INDEX IF NOT EXISTS idx_preflight_user_repo
                    ON preflights(repo_url, user_id) WHERE user_id IS NOT NULL;
                 CREATE UNIQUE INDEX IF NOT EXISTS idx_preflight_public_repo
                    ON preflights(repo_url) WHERE user_id IS NULL AND is_private = 0;
                 CREATE INDEX IF NOT EXISTS idx_preflight_expires ON preflights(expires_at);",
            )
            .map_err(|e| PreflightError::Storage(e.to_string()))?;
            Ok(())
        }

        fn row_to_preflight(row: &rusqlite::Row) -> rusqlite::Result<Preflight> {
            let repo_map_json: String = row.get("repo_map")?;
            let stats_json: String = row.get("stats")?;
            let fetch_strategy: String = row.get("fetch_strategy")?;
            Ok(Preflight {
                id: row
                    .get::<_, String>("id")?
                    .parse()
                    .unwrap_or_else(|_| PreflightId::new()),
                repo_url: row.get("repo_url")?,
                owner: row.get("owner")?,
                repo: row.get("repo")?,
                default_branch: row.get("default_branch")?,
                repo_map: serde_json::from_str(&repo_map_json).unwrap_or_default(),
                stats: serde_json::from_str(&stats_json).unwrap_or(serde_json::Value::Null),
                fingerprint: row.get("fingerprint")?,
                is_private: row.get::<_, i64>("is_private")? != 0,
                fetch_strategy: if fetch_strategy == "authenticated" {
                    FetchStrategy::Authenticated
                } else {
                    FetchStrategy::Public
                },
                github_account_id: row.get("github_account_id")?,
                token_valid: row.get::<_, i64>("token_valid")? != 0,
                user_id: row.get("user_id")?,
                file_count: row.get::<_, i64>("file_count")? as u32,
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
                expires_at: row.get("expires_at")?,
            })
        }
    }

    #[async_trait]
    impl PreflightStore for SqlitePreflightStore {
        async fn create(&self, input: NewPreflight) -> Result<Preflight, PreflightError> {
            let now = Utc::now();
            let preflight = Preflight {
                id: PreflightId::new(),
                repo_url: input.repo_url,
                owner: input.owner,
                repo: input.repo,
                default_branch: input.default_branch,
                repo_map: input.repo_map,
                stats: input.stats,
                fingerprint: input.fingerprint,
                is_private: input.is_private,
                fetch_strategy: input.fetch_strategy,
                github_account_id: input.github_account_id,
                token_valid: true,
                user_id: input.user_id,
                file_count: 0,
                created_at: now,
                updated_at: now,
                expires_at: now + ChronoDuration::hours(24),
            };
            let file_count = preflight.repo_map.len() as i64;
            let repo_map_json = serde_json::to_string(&preflight.repo_map)?;
            let stats_json = serde_json::to_string(&preflight.stats)?;
            let fetch_strategy = match preflight.fetch_strategy {
                FetchStrategy::Public => "public",
                FetchStrategy::Authenticated => "authenticated",
            };

            // `id` is deliberately excluded from every DO UPDATE clause below: on an
            // upsert hit the row keeps its original id, so `RETURNING *` (not the
            // freshly-generated `preflight.id`) is the source of truth for the
            // caller's id.
            let conn = self.conn.lock().await;
            conn.query_row(
                "INSERT INTO preflights (
                    id, repo_url, owner, repo, default_branch, repo_map, stats,
                    fingerprint, is_private, fetch_strategy, github_account_id,
                    token_valid, user_id, file_count, created_at, updated_at, expires_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
                 ON CONFLICT (repo_url, user_id) WHERE user_id IS NOT NULL DO UPDATE SET
                    default_branch=excluded.default_branch, repo_map=excluded.repo_map,
                    stats=excluded.stats, fingerprint=excluded.fingerprint,
                    is_private=excluded.is_private, fetch_strategy=excluded.fetch_strategy,
                    github_account_id=excluded.github_account_id, file_count=excluded.file_count,
                    updated_at=excluded.updated_at, expires_at=excluded.expires_at
                 ON CONFLICT (repo_url) WHERE user_id IS NULL AND is_private = 0 DO UPDATE SET
                    default_branch=excluded.default_branch, repo_map=excluded.repo_map,
                    stats=excluded.stats, fingerprint=excluded.fingerprint,
                    fetch_strategy=excluded.fetch_strategy,
                    github_account_id=excluded.github_account_id, file_count=excluded.file_count,
                    updated_at=excluded.updated_at, expires_at=excluded.expires_at
                 RETURNING *",
                params![
                    preflight.id.to_string(),
                    preflight.repo_url,
                    preflight.owner,
                    preflight.repo,
                    preflight.default_branch,
                    repo_map_json,
                    stats_json,
                    preflight.fingerprint,
                    preflight.is_private as i64,
                    fetch_strategy,
                    preflight.github_account_id,
                    preflight.token_valid as i64,
                    preflight.user_id,
                    file_count,
                    preflight.created_at,
                    preflight.updated_at,
                    preflight.expires_at,
                ],
                Self::row_to_preflight,
            )
            .map_err(|e| PreflightError::Storage(e.to_string()))
        }

        async fn get(&self, id: PreflightId) -> Result<Preflight, PreflightError> {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT * FROM preflights WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_preflight,
            )
            .optional()
            .map_err(|e| PreflightError::Storage(e.to_string()))?
            .ok_or(PreflightError::NotFound(id))
        }

        async fn cleanup_expired(&self) -> Result<u64, PreflightError> {
            let conn = self.conn.lock().await;
            let now = Utc::now();
            let affected = conn
                .execute(
                    "DELETE FROM preflights WHERE expires_at < ?1",
                    params![now],
                )
                .map_err(|e| PreflightError::Storage(e.to_string()))?;
            Ok(affected as u64)
        }
    }
}

#[cfg(feature = "cron")]
pub use sqlite::SqlitePreflightStore;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(repo_url: &str, user_id: Option<&str>) -> NewPreflight {
        NewPreflight {
            repo_url: repo_url.to_string(),
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            default_branch: "main".to_string(),
            repo_map: vec![RepoMapEntry {
                path: "src/lib.rs".to_string(),
                size: 128,
                entry_type: "file".to_string(),
                url: format!("{repo_url}/blob/main/src/lib.rs"),
            }],
            stats: serde_json::json!({"languages": {"rust": 1.0}}),
            fingerprint: "abc123".to_string(),
            is_private: false,
            fetch_strategy: FetchStrategy::Public,
            user_id: user_id.map(|s| s.to_string()),
            github_account_id: None,
        }
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = sqlite::SqlitePreflightStore::open_in_memory().unwrap();
        let created = store
            .create(sample("https://github.com/acme/widgets", Some("user-1")))
            .await
            .unwrap();
        assert_eq!(created.file_count, 1);
        assert!(created.expires_at > created.created_at);

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.repo_map.len(), 1);
        assert_eq!(fetched.repo_map[0].path, "src/lib.rs");
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = sqlite::SqlitePreflightStore::open_in_memory().unwrap();
        let err = store.get(PreflightId::new()).await.unwrap_err();
        assert!(matches!(err, PreflightError::NotFound(_)));
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn upsert_on_repo_and_user_preserves_id() {
        let store = sqlite::SqlitePreflightStore::open_in_memory().unwrap();
        let first = store
            .create(sample("https://github.com/acme/widgets", Some("user-1")))
            .await
            .unwrap();

        let mut second_input = sample("https://github.com/acme/widgets", Some("user-1"));
        second_input.fingerprint = "def456".to_string();
        let second = store.create(second_input).await.unwrap();

        assert_eq!(first.id, second.id, "upsert must keep the original id");
        assert_eq!(second.fingerprint, "def456");
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn upsert_on_public_repo_without_user_preserves_id() {
        let store = sqlite::SqlitePreflightStore::open_in_memory().unwrap();
        let first = store
            .create(sample("https://github.com/acme/public-tool", None))
            .await
            .unwrap();
        let second = store
            .create(sample("https://github.com/acme/public-tool", None))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn distinct_users_on_same_repo_do_not_collide() {
        let store = sqlite::SqlitePreflightStore::open_in_memory().unwrap();
        let a = store
            .create(sample("https://github.com/acme/widgets", Some("user-1")))
            .await
            .unwrap();
        let b = store
            .create(sample("https://github.com/acme/widgets", Some("user-2")))
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
    }

    #[cfg(feature = "cron")]
    #[tokio::test]
    async fn cleanup_expired_deletes_only_expired_rows() {
        let store = sqlite::SqlitePreflightStore::open_in_memory().unwrap();
        let kept = store
            .create(sample("https://github.com/acme/widgets", Some("user-1")))
            .await
            .unwrap();
        let expired = store
            .create(sample("https://github.com/acme/legacy", Some("user-1")))
            .await
            .unwrap();

        {
            let conn = store.conn.lock().await;
            conn.execute(
                "UPDATE preflights SET expires_at = ?1 WHERE id = ?2",
                rusqlite::params![
                    Utc::now() - ChronoDuration::hours(1),
                    expired.id.to_string(),
                ],
            )
            .unwrap();
        }

        let deleted = store.cleanup_expired().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(kept.id).await.is_ok());
        assert!(store.get(expired.id).await.is_err());
    }
}
