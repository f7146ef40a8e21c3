//! Cloud completion client, grounded directly on the agent-runtime crate's
//! `http_input::llm_client::LlmClient`: the same provider auto-detection
//! order (OpenRouter, then OpenAI, then Anthropic) and the same two wire
//! formats (OpenAI-compatible chat completions vs. the Anthropic Messages
//! API), reused here for both structured JSON completions (planner/worker)
//! and tagged-text completions (the reasoning loop).

use std::time::Duration;

use crate::config::{CompletionConfig, CompletionProvider};
use crate::reasoning::inference::{
    FinishReason, InferenceError, InferenceOptions, InferenceProvider, InferenceResponse, Usage,
};

pub struct CloudCompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CloudCompletionClient {
    pub fn new(config: CompletionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Convenience entry point used by the planner/worker, which only need
    /// text back plus a token count rather than the full inference envelope.
    pub async fn complete(&self, system: &str, user: &str) -> Result<(String, u64), InferenceError> {
        let response = InferenceProvider::complete(self, system, user, &InferenceOptions::default()).await?;
        Ok((response.text, response.usage.total_tokens))
    }

    async fn openai_completion(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| InferenceError::Provider(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(InferenceError::RateLimited { retry_after_ms: 1000 });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Provider(format!("{status}: {body}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::ParseError(e.to_string()))?;

        let text = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| InferenceError::ParseError("no content in choices[0].message".to_string()))?
            .to_string();

        let usage = payload
            .get("usage")
            .map(|u| Usage {
                prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            })
            .unwrap_or_default();

        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion request succeeded"
        );

        Ok(InferenceResponse {
            text,
            usage,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn anthropic_completion(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": options.max_tokens,
            "system": system,
            "messages": [
                { "role": "user", "content": user }
            ],
        });

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| InferenceError::Provider(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(InferenceError::RateLimited { retry_after_ms: 1000 });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Provider(format!("{status}: {body}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::ParseError(e.to_string()))?;

        let text = payload
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| blocks.iter().find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text")))
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| InferenceError::ParseError("no text block in content".to_string()))?
            .to_string();

        let usage = payload
            .get("usage")
            .map(|u| {
                let prompt_tokens = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                let completion_tokens = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }
            })
            .unwrap_or_default();

        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion request succeeded"
        );

        Ok(InferenceResponse {
            text,
            usage,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[async_trait::async_trait]
impl InferenceProvider for CloudCompletionClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        match self.config.provider {
            CompletionProvider::Anthropic => self.anthropic_completion(system, user, options).await,
            CompletionProvider::OpenAI | CompletionProvider::OpenRouter => {
                self.openai_completion(system, user, options).await
            }
        }
    }
}
