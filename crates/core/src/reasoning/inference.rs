//! Provider-agnostic completion abstraction, adapted near-verbatim from the
//! agent-runtime crate's `reasoning::inference` — this layer encodes no
//! teacher-specific semantics, just ambient LLM-client plumbing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.3,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("context overflow: {0} tokens exceeds budget of {1}")]
    ContextOverflow(usize, usize),
    #[error("model unavailable")]
    ModelUnavailable,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_documented_budget() {
        let opts = InferenceOptions::default();
        assert_eq!(opts.max_tokens, 4096);
        assert!((opts.temperature - 0.3).abs() < f32::EPSILON);
    }
}
