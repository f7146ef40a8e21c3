//! GitHub tools (§4.7): thin wrappers over the REST API, using the same
//! `reqwest::Client` + bearer-token pattern the completion client uses for
//! its own outbound calls.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ExecutionContext, Permission, Tool, ToolOutput};
use crate::types::ToolError;

const GITHUB_API_BASE: &str = "https://api.github.com";
const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";

fn auth_header(ctx: &ExecutionContext) -> Option<String> {
    ctx.github_token.as_ref().map(|t| format!("Bearer {t}"))
}

fn map_status(status: reqwest::StatusCode, context: &str) -> ToolError {
    match status.as_u16() {
        404 => ToolError::ExecutionFailed(format!("{context}: not found")),
        401 => ToolError::ExecutionFailed(format!("{context}: unauthorized")),
        403 => ToolError::ExecutionFailed(format!("{context}: forbidden or rate-limited")),
        other => ToolError::ExecutionFailed(format!("{context}: unexpected status {other}")),
    }
}

#[derive(Debug, Deserialize)]
struct FetchFileInput {
    owner: String,
    repo: String,
    path: String,
    branch: Option<String>,
}

pub struct FetchGithubFile;

#[async_trait]
impl Tool for FetchGithubFile {
    fn name(&self) -> &str {
        "fetch_github_file"
    }

    fn description(&self) -> &str {
        "Fetches the raw content of a single file from a GitHub repository."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["owner", "repo", "path"],
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "path": {"type": "string"},
                "branch": {"type": "string"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: FetchFileInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        let mut url = format!(
            "{GITHUB_API_BASE}/repos/{}/{}/contents/{}",
            input.owner, input.repo, input.path
        );
        if let Some(branch) = &input.branch {
            url.push_str(&format!("?ref={branch}"));
        }

        let mut request = ctx
            .http_client
            .get(&url)
            .header("Accept", ACCEPT_HEADER)
            .header("User-Agent", "auditd");
        if let Some(auth) = auth_header(ctx) {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(map_status(response.status(), "fetch_github_file"));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let content_b64 = payload
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ToolError::ExecutionFailed("response had no content field".to_string()))?;
        let content_b64: String = content_b64.chars().filter(|c| !c.is_whitespace()).collect();

        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(content_b64)
            .map_err(|e| ToolError::ExecutionFailed(format!("bad base64 content: {e}")))?;
        let text = String::from_utf8_lossy(&decoded).into_owned();

        Ok(ToolOutput::ok(serde_json::json!({
            "path": input.path,
            "content": text,
            "sha": payload.get("sha"),
            "size": payload.get("size"),
        })))
    }
}

#[derive(Debug, Deserialize)]
struct ListFilesInput {
    owner: String,
    repo: String,
    path: Option<String>,
    branch: Option<String>,
}

pub struct ListRepoFiles;

#[async_trait]
impl Tool for ListRepoFiles {
    fn name(&self) -> &str {
        "list_repo_files"
    }

    fn description(&self) -> &str {
        "Lists files and directories at a path in a GitHub repository."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["owner", "repo"],
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "path": {"type": "string"},
                "branch": {"type": "string"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: ListFilesInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        let path = input.path.unwrap_or_default();
        let mut url = format!(
            "{GITHUB_API_BASE}/repos/{}/{}/contents/{}",
            input.owner, input.repo, path
        );
        if let Some(branch) = &input.branch {
            url.push_str(&format!("?ref={branch}"));
        }

        let mut request = ctx
            .http_client
            .get(&url)
            .header("Accept", ACCEPT_HEADER)
            .header("User-Agent", "auditd");
        if let Some(auth) = auth_header(ctx) {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(map_status(response.status(), "list_repo_files"));
        }

        let entries: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::ok(serde_json::json!({ "entries": entries })))
    }
}

#[derive(Debug, Deserialize)]
struct RepoInfoInput {
    owner: String,
    repo: String,
}

pub struct GetRepoInfo;

#[async_trait]
impl Tool for GetRepoInfo {
    fn name(&self) -> &str {
        "get_repo_info"
    }

    fn description(&self) -> &str {
        "Fetches repository metadata (default branch, visibility, description, language)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["owner", "repo"],
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let input: RepoInfoInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput { tool: self.name().to_string(), reason: e.to_string() })?;

        let url = format!("{GITHUB_API_BASE}/repos/{}/{}", input.owner, input.repo);
        let mut request = ctx
            .http_client
            .get(&url)
            .header("Accept", ACCEPT_HEADER)
            .header("User-Agent", "auditd");
        if let Some(auth) = auth_header(ctx) {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(map_status(response.status(), "get_repo_info"));
        }

        let info: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::ok(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_file_schema_requires_owner_repo_path() {
        let schema = FetchGithubFile.input_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("owner")));
        assert!(required.contains(&serde_json::json!("repo")));
        assert!(required.contains(&serde_json::json!("path")));
    }

    #[test]
    fn tools_require_read_permission_only() {
        assert_eq!(FetchGithubFile.required_permission(), Permission::Read);
        assert_eq!(ListRepoFiles.required_permission(), Permission::Read);
        assert_eq!(GetRepoInfo.required_permission(), Permission::Read);
    }
}
