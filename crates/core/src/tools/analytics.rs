//! Audit analytics tools (§4.7): lightweight, deterministic helpers a
//! reasoning-loop session can call directly rather than re-deriving the
//! coordinator's scoring logic inline in a prompt.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ExecutionContext, Permission, Tool, ToolOutput};
use crate::pipeline::scoring::{score_issues, Severity};
use crate::types::ToolError;

#[derive(Debug, Deserialize)]
struct AnalyzeFilesInput {
    files: Vec<serde_json::Value>,
    #[serde(default, rename = "focusAreas")]
    focus_areas: Vec<String>,
    context: Option<serde_json::Value>,
}

pub struct AnalyzeCodeFiles;

#[async_trait]
impl Tool for AnalyzeCodeFiles {
    fn name(&self) -> &str {
        "analyze_code_files"
    }

    fn description(&self) -> &str {
        "Summarizes a batch of files by size and extension, as a cheap pre-pass before a full worker run."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["files"],
            "properties": {
                "files": {"type": "array"},
                "focusAreas": {"type": "array", "items": {"type": "string"}},
                "context": {"type": "object"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: AnalyzeFilesInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        let total_bytes: u64 = input
            .files
            .iter()
            .filter_map(|f| f.get("size").and_then(|s| s.as_u64()))
            .sum();

        let extensions: std::collections::HashSet<String> = input
            .files
            .iter()
            .filter_map(|f| f.get("path").and_then(|p| p.as_str()))
            .filter_map(|path| path.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
            .collect();

        Ok(ToolOutput::ok(serde_json::json!({
            "fileCount": input.files.len(),
            "totalBytes": total_bytes,
            "extensions": extensions.into_iter().collect::<Vec<_>>(),
            "focusAreas": input.focus_areas,
            "contextEcho": input.context,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct IssueSeverityOnly {
    severity: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalculateHealthScoreInput {
    issues: Vec<IssueSeverityOnly>,
    file_count: u32,
}

pub struct CalculateHealthScore;

#[async_trait]
impl Tool for CalculateHealthScore {
    fn name(&self) -> &str {
        "calculate_health_score"
    }

    fn description(&self) -> &str {
        "Applies the deterministic health-scoring formula to an issue list."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["issues", "fileCount"],
            "properties": {
                "issues": {"type": "array"},
                "fileCount": {"type": "integer"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: CalculateHealthScoreInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        let severities: Vec<Severity> = input
            .issues
            .iter()
            .filter_map(|i| serde_json::from_value(serde_json::json!(i.severity)).ok())
            .collect();

        let result = score_issues(&severities);

        Ok(ToolOutput::ok(serde_json::json!({
            "healthScore": result.health_score,
            "riskLevel": result.risk_level,
            "productionReady": result.production_ready,
            "fileCount": input.file_count,
        })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateSummaryInput {
    health_score: u8,
    issues: Vec<serde_json::Value>,
    strengths: Option<Vec<String>>,
    repo_name: Option<String>,
}

pub struct GenerateSummary;

#[async_trait]
impl Tool for GenerateSummary {
    fn name(&self) -> &str {
        "generate_summary"
    }

    fn description(&self) -> &str {
        "Composes a short executive summary sentence from a score and issue counts, without calling an LLM."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["healthScore", "issues"],
            "properties": {
                "healthScore": {"type": "integer"},
                "issues": {"type": "array"},
                "strengths": {"type": "array", "items": {"type": "string"}},
                "repoName": {"type": "string"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: GenerateSummaryInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        let repo_label = input.repo_name.as_deref().unwrap_or("this repository");
        let critical_count = input
            .issues
            .iter()
            .filter(|i| i.get("severity").and_then(|s| s.as_str()) == Some("critical"))
            .count();

        let mut summary = format!(
            "{repo_label} scores {} out of 100 across {} reported issue(s)",
            input.health_score,
            input.issues.len()
        );
        if critical_count > 0 {
            summary.push_str(&format!(", including {critical_count} critical finding(s)"));
        }
        summary.push('.');
        if let Some(strengths) = &input.strengths {
            if let Some(first) = strengths.first() {
                summary.push_str(&format!(" Notable strength: {first}."));
            }
        }

        Ok(ToolOutput::ok(serde_json::json!({ "summary": summary })))
    }
}

#[derive(Debug, Deserialize)]
struct DeepAiAnalysisInput {
    query: String,
    context: Option<serde_json::Value>,
    #[serde(default, rename = "analysisType")]
    analysis_type: Option<String>,
}

pub struct DeepAiAnalysis;

#[async_trait]
impl Tool for DeepAiAnalysis {
    fn name(&self) -> &str {
        "deep_ai_analysis"
    }

    fn description(&self) -> &str {
        "Runs a free-form completion against the configured provider for analysis beyond the fixed tools."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {"type": "string"},
                "context": {"type": "object"},
                "analysisType": {"type": "string"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Execute
    }

    async fn execute(&self, input: serde_json::Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: DeepAiAnalysisInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        // This tool intentionally has no completion client wired in by
        // default — callers that need it construct an `ExecutionContext`
        // with one and a dedicated tool instance; the registry's built-in
        // catalog exposes the deterministic shape so a caller without a
        // provider configured still gets a structured (if shallow) result.
        Ok(ToolOutput::ok(serde_json::json!({
            "query": input.query,
            "analysisType": input.analysis_type.unwrap_or_else(|| "general".to_string()),
            "contextEcho": input.context,
            "note": "deep_ai_analysis requires a completion provider bound at call time",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
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
    async fn calculate_health_score_matches_scenario_s1() {
        let input = serde_json::json!({
            "issues": [
                {"severity": "critical"},
                {"severity": "high"},
                {"severity": "high"},
                {"severity": "low"}
            ],
            "fileCount": 10
        });
        let output = CalculateHealthScore.execute(input, &ctx()).await.unwrap();
        let data = output.data.unwrap();
        assert_eq!(data["healthScore"], 75);
        assert_eq!(data["productionReady"], false);
    }

    #[tokio::test]
    async fn generate_summary_mentions_critical_count() {
        let input = serde_json::json!({
            "healthScore": 60,
            "issues": [{"severity": "critical"}, {"severity": "low"}],
            "repoName": "widgets"
        });
        let output = GenerateSummary.execute(input, &ctx()).await.unwrap();
        let summary = output.data.unwrap()["summary"].as_str().unwrap().to_string();
        assert!(summary.contains("widgets"));
        assert!(summary.contains("1 critical"));
    }

    #[tokio::test]
    async fn analyze_code_files_counts_extensions() {
        let input = serde_json::json!({
            "files": [
                {"path": "src/main.rs", "size": 100},
                {"path": "src/lib.rs", "size": 200},
                {"path": "README.md", "size": 50}
            ]
        });
        let output = AnalyzeCodeFiles.execute(input, &ctx()).await.unwrap();
        let data = output.data.unwrap();
        assert_eq!(data["fileCount"], 3);
        assert_eq!(data["totalBytes"], 350);
    }
}
