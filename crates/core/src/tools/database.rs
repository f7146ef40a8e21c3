//! Database tools (§4.7): allow-listed table access plus the writer tool the
//! coordinator's worker-facing analogue uses to persist results mid-session.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ExecutionContext, Permission, Tool, ToolOutput};
use crate::results::NewAudit;
use crate::types::{AuditId, ToolError};

/// Tables a caller may query through `query_db`; anything else is rejected
/// up front rather than forwarded to a query layer.
const ALLOWED_TABLES: &[&str] = &["audits", "preflights"];

#[derive(Debug, Deserialize)]
struct QueryDbInput {
    table: String,
    #[serde(default)]
    filters: serde_json::Value,
    select: Option<Vec<String>>,
    limit: Option<u32>,
    order_by: Option<String>,
}

pub struct QueryDb;

#[async_trait]
impl Tool for QueryDb {
    fn name(&self) -> &str {
        "query_db"
    }

    fn description(&self) -> &str {
        "Queries an allow-listed table with simple equality filters."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["table"],
            "properties": {
                "table": {"type": "string", "enum": ALLOWED_TABLES},
                "filters": {"type": "object"},
                "select": {"type": "array", "items": {"type": "string"}},
                "limit": {"type": "integer"},
                "orderBy": {"type": "string"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: QueryDbInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        if !ALLOWED_TABLES.contains(&input.table.as_str()) {
            return Err(ToolError::InvalidInput {
                tool: self.name().to_string(),
                reason: format!("table '{}' is not allow-listed", input.table),
            });
        }

        match input.table.as_str() {
            "audits" => {
                let repo_url = input
                    .filters
                    .get("repoUrl")
                    .and_then(|v| v.as_str())
                    .or_else(|| ctx.preflight.as_ref().map(|p| p.repo_url.as_str()))
                    .ok_or_else(|| ToolError::InvalidInput {
                        tool: self.name().to_string(),
                        reason: "query on 'audits' requires a repoUrl filter".to_string(),
                    })?;
                let mut rows = ctx
                    .chunk_store
                    .list_for_repo(repo_url)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                if let Some(limit) = input.limit {
                    rows.truncate(limit as usize);
                }
                let rows_json = rows
                    .into_iter()
                    .map(|r| serde_json::to_value(r).unwrap_or_default())
                    .collect::<Vec<_>>();
                Ok(ToolOutput::ok(serde_json::json!({ "rows": rows_json })))
            }
            "preflights" => Ok(ToolOutput::ok(serde_json::json!({
                "rows": ctx
                    .preflight
                    .as_ref()
                    .map(|p| vec![serde_json::to_value(p.as_ref()).unwrap_or_default()])
                    .unwrap_or_default(),
            }))),
            other => Err(ToolError::InvalidInput {
                tool: self.name().to_string(),
                reason: format!("unsupported table '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveAuditResultsInput {
    repo_url: Option<String>,
    health_score: f64,
    summary: String,
    issues: Vec<serde_json::Value>,
    tier: String,
    total_tokens: Option<u64>,
    extra_data: Option<serde_json::Value>,
}

pub struct SaveAuditResults;

#[async_trait]
impl Tool for SaveAuditResults {
    fn name(&self) -> &str {
        "save_audit_results"
    }

    fn description(&self) -> &str {
        "Persists an audit's findings and summary to the chunked result store."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["healthScore", "summary", "issues", "tier"],
            "properties": {
                "repoUrl": {"type": "string"},
                "healthScore": {"type": "number"},
                "summary": {"type": "string"},
                "issues": {"type": "array"},
                "tier": {"type": "string"},
                "totalTokens": {"type": "integer"},
                "extraData": {"type": "object"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Write
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: SaveAuditResultsInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        // The writer must refuse a missing repoUrl even if the context has a
        // preflight, unless the preflight itself supplies one (§4.7).
        let repo_url = input
            .repo_url
            .or_else(|| ctx.preflight.as_ref().map(|p| p.repo_url.clone()))
            .ok_or_else(|| ToolError::InvalidInput {
                tool: self.name().to_string(),
                reason: "repoUrl is required and was not supplied by the caller or the preflight".to_string(),
            })?;

        let audit_id = AuditId::new();
        let extra_data = input.extra_data.unwrap_or(serde_json::Value::Null);

        ctx.chunk_store
            .create_audit(
                audit_id,
                NewAudit {
                    user_id: ctx.user_id.clone(),
                    repo_url,
                    tier: input.tier,
                    health_score: input.health_score.round() as u8,
                    summary: input.summary,
                    total_tokens: input.total_tokens.unwrap_or(0),
                    estimated_tokens: None,
                },
            )
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        ctx.chunk_store
            .store_audit_results(audit_id, &input.issues, &extra_data)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::ok(serde_json::json!({ "auditId": audit_id.to_string() })))
    }
}

#[derive(Debug, Deserialize, Default)]
struct GetPreflightInput {
    #[serde(rename = "preflightId")]
    preflight_id: Option<String>,
}

pub struct GetPreflight;

#[async_trait]
impl Tool for GetPreflight {
    fn name(&self) -> &str {
        "get_preflight"
    }

    fn description(&self) -> &str {
        "Returns the preflight snapshot already loaded into this execution context."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "preflightId": {"type": "string"} }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: GetPreflightInput = if input.is_null() {
            GetPreflightInput::default()
        } else {
            serde_json::from_value(input)
                .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?
        };

        let preflight = ctx.preflight.as_ref().ok_or_else(|| ToolError::ExecutionFailed(
            "no preflight loaded in this execution context".to_string(),
        ))?;

        if let Some(requested) = input.preflight_id {
            if requested != preflight.id.to_string() {
                return Err(ToolError::InvalidInput {
                    tool: self.name().to_string(),
                    reason: "requested preflightId does not match the context's preflight".to_string(),
                });
            }
        }

        Ok(ToolOutput::ok(serde_json::to_value(preflight.as_ref()).unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx_without_preflight() -> ExecutionContext {
        ExecutionContext {
            user_id: None,
            permission: Permission::Admin,
            preflight: None,
            github_token: None,
            chunk_store: Arc::new(crate::results::sqlite::SqliteChunkStore::open_in_memory().unwrap()),
            http_client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn save_audit_results_rejects_missing_repo_url() {
        let ctx = ctx_without_preflight();
        let input = serde_json::json!({
            "healthScore": 90.0,
            "summary": "looks fine",
            "issues": [],
            "tier": "security",
        });
        let err = SaveAuditResults.execute(input, &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn save_audit_results_persists_with_explicit_repo_url() {
        let ctx = ctx_without_preflight();
        let input = serde_json::json!({
            "repoUrl": "https://github.com/acme/widgets",
            "healthScore": 90.0,
            "summary": "looks fine",
            "issues": [{"id": "1", "severity": "low"}],
            "tier": "security",
        });
        let output = SaveAuditResults.execute(input, &ctx).await.unwrap();
        assert!(output.success);
        assert!(output.data.unwrap()["auditId"].is_string());
    }

    #[tokio::test]
    async fn query_db_rejects_non_allow_listed_table() {
        let ctx = ctx_without_preflight();
        let input = serde_json::json!({ "table": "users" });
        let err = QueryDb.execute(input, &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn get_preflight_fails_without_one_loaded() {
        let ctx = ctx_without_preflight();
        let err = GetPreflight.execute(serde_json::Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
