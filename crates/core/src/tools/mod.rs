//! Tool registry (C7): a permissioned catalog of callable tools the
//! reasoning loop and the pipeline's workers invoke, grounded on the
//! agent-runtime crate's `integrations::tool_invocation` enforcement pattern
//! — here simplified to the spec's flat ordinal permission model rather than
//! that module's verification-status machine.

pub mod analytics;
pub mod database;
pub mod github;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::preflight::Preflight;
use crate::results::ChunkStore;
use crate::types::ToolError;

/// Ordinal permission level a tool requires and a caller presents. A caller
/// whose level is `>=` a tool's required level may invoke it (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

/// Everything a tool's `execute` needs beyond its typed input: the caller's
/// permission, an optional preflight to ground repo-scoped tools, shared
/// stores, and an HTTP client for outbound calls (GitHub, etc).
pub struct ExecutionContext {
    pub user_id: Option<String>,
    pub permission: Permission,
    pub preflight: Option<Arc<Preflight>>,
    pub github_token: Option<String>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub http_client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub token_usage: Option<u64>,
    pub metadata: Option<serde_json::Value>,
    #[serde(skip)]
    pub duration: Option<Duration>,
}

impl ToolOutput {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    fn required_permission(&self) -> Permission;
    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// One requested call in an `ExecuteParallel` batch (§4.6 `batch_call`).
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub input: serde_json::Value,
    pub priority: u32,
}

pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// The full built-in catalog (§4.7): GitHub, database, and analytics
    /// tools, wired to the given chunk store for the database tools that
    /// persist audit results.
    pub fn with_builtins(chunk_store: Arc<dyn ChunkStore>) -> Self {
        let registry = Self::new();
        registry.register_many(vec![
            Arc::new(github::FetchGithubFile) as Arc<dyn Tool>,
            Arc::new(github::ListRepoFiles),
            Arc::new(github::GetRepoInfo),
            Arc::new(database::QueryDb),
            Arc::new(database::SaveAuditResults),
            Arc::new(database::GetPreflight),
            Arc::new(analytics::AnalyzeCodeFiles),
            Arc::new(analytics::CalculateHealthScore),
            Arc::new(analytics::GenerateSummary),
            Arc::new(analytics::DeepAiAnalysis),
        ]);
        let _ = chunk_store;
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn register_many(&self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.clone())
    }

    /// Tools the caller's permission allows, or the full catalog if no
    /// filter is given.
    pub fn list(&self, caller_permission: Option<Permission>) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|entry| {
                caller_permission
                    .map(|p| p >= entry.value().required_permission())
                    .unwrap_or(true)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).map(|t| t.clone()).ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if ctx.permission < tool.required_permission() {
            // Permission failures are reported in the tool result, never thrown
            // (§7) — an `Err` here would reach the reasoning loop's generic
            // error-recovery path and trip the per-tool circuit breaker for a
            // caller that simply lacks permission, not a flaky tool.
            return Ok(ToolOutput::err(
                ToolError::PermissionDenied {
                    tool: name.to_string(),
                    required: tool.required_permission(),
                    actual: ctx.permission,
                }
                .to_string(),
            ));
        }

        let started = Instant::now();
        let mut output = tool.execute(input, ctx).await?;
        output.duration = Some(started.elapsed());
        Ok(output)
    }

    /// Groups `calls` by `priority`, running each priority group
    /// concurrently while preserving sequential order across groups,
    /// per §4.7.
    pub async fn execute_parallel(
        &self,
        calls: Vec<ToolCall>,
        ctx: &ExecutionContext,
    ) -> Vec<(String, Result<ToolOutput, ToolError>)> {
        let mut by_priority: HashMap<u32, Vec<ToolCall>> = HashMap::new();
        for call in calls {
            by_priority.entry(call.priority).or_default().push(call);
        }
        let mut priorities: Vec<u32> = by_priority.keys().copied().collect();
        priorities.sort_unstable();

        let mut results = Vec::new();
        for priority in priorities {
            let group = by_priority.remove(&priority).unwrap_or_default();
            let futures = group
                .into_iter()
                .map(|call| async move {
                    let result = self.execute(&call.name, call.input, ctx).await;
                    (call.name, result)
                })
                .collect::<Vec<_>>();
            let group_results = futures::future::join_all(futures).await;
            results.extend(group_results);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn required_permission(&self) -> Permission {
            Permission::Read
        }
        async fn execute(&self, input: serde_json::Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::ok(input))
        }
    }

    struct AdminOnlyTool;

    #[async_trait]
    impl Tool for AdminOnlyTool {
        fn name(&self) -> &str {
            "admin_only"
        }
        fn description(&self) -> &str {
            "requires admin"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn required_permission(&self) -> Permission {
            Permission::Admin
        }
        async fn execute(&self, _input: serde_json::Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::ok(serde_json::json!({})))
        }
    }

    fn test_ctx(permission: Permission) -> ExecutionContext {
        ExecutionContext {
            user_id: None,
            permission,
            preflight: None,
            github_token: None,
            chunk_store: Arc::new(crate::results::sqlite::SqliteChunkStore::open_in_memory().unwrap()),
            http_client: reqwest::Client::new(),
        }
    }

    #[test]
    fn permission_ordinals_compare_as_documented() {
        assert!(Permission::Admin > Permission::Execute);
        assert!(Permission::Execute > Permission::Write);
        assert!(Permission::Write > Permission::Read);
    }

    #[tokio::test]
    async fn execute_allows_caller_with_sufficient_permission() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let ctx = test_ctx(Permission::Read);
        let output = registry
            .execute("echo", serde_json::json!({"x": 1}), &ctx)
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.data.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn execute_denies_caller_below_required_permission() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(AdminOnlyTool));
        let ctx = test_ctx(Permission::Write);
        // Permission failures are reported in the result, never thrown (§7),
        // so a denial is still `Ok` — just `success: false`.
        let output = registry
            .execute("admin_only", serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.error.unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_not_found() {
        let registry = ToolRegistry::new();
        let ctx = test_ctx(Permission::Admin);
        let err = registry.execute("nope", serde_json::json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_permission() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(AdminOnlyTool));
        let readable = registry.list(Some(Permission::Read));
        assert_eq!(readable.len(), 1);
        assert_eq!(readable[0].name(), "echo");
        let all = registry.list(Some(Permission::Admin));
        assert_eq!(all.len(), 2);
    }
}
