//! The universal THINK/ACT/OBSERVE driver (§4.6), wired to the journal, the
//! tool registry, a completion provider, and the context manager/circuit
//! breaker ambient layers.

use std::sync::Arc;

use crate::reasoning::circuit_breaker::CircuitBreaker;
use crate::reasoning::context_manager;
use crate::reasoning::conversation::Conversation;
use crate::reasoning::inference::{InferenceOptions, InferenceProvider};
use crate::reasoning::journal::ReasoningJournal;
use crate::reasoning::loop_types::{LoopConfig, LoopOutcome, ReasoningStep, SessionStatus};
use crate::reasoning::parser::{self, ParsedAction};
use crate::tools::{ExecutionContext, ToolCall, ToolRegistry};
use crate::types::ReasoningError;

pub struct ReasoningLoopRunner {
    journal: Arc<dyn ReasoningJournal>,
    tools: Arc<ToolRegistry>,
    completion: Arc<dyn InferenceProvider>,
    circuit_breaker: Arc<CircuitBreaker>,
    config: LoopConfig,
}

impl ReasoningLoopRunner {
    pub fn new(
        journal: Arc<dyn ReasoningJournal>,
        tools: Arc<ToolRegistry>,
        completion: Arc<dyn InferenceProvider>,
        circuit_breaker: Arc<CircuitBreaker>,
        config: LoopConfig,
    ) -> Self {
        Self {
            journal,
            tools,
            completion,
            circuit_breaker,
            config,
        }
    }

    /// Runs a session to completion, failure, a human-needed pause, or
    /// budget exhaustion (§4.6).
    pub async fn run(
        &self,
        task_description: String,
        user_id: Option<String>,
        tool_ctx: ExecutionContext,
    ) -> Result<LoopOutcome, ReasoningError> {
        let session = self
            .journal
            .create_session(task_description.clone(), user_id, None)
            .await?;

        let mut conversation = Conversation::new();
        conversation.push_system(self.system_prompt(&tool_ctx));
        conversation.push_user(task_description);

        let mut step_number: u32 = 0;

        loop {
            if step_number >= self.config.max_iterations {
                self.journal
                    .update_session_status(session.id, SessionStatus::Failed)
                    .await?;
                return Ok(LoopOutcome::BudgetExhausted {
                    session_id: session.id,
                    total_steps: step_number,
                });
            }

            context_manager::compact(
                &mut conversation,
                self.config.context_token_budget,
                self.config.context_strategy,
            );

            let prompt = conversation.render_as_prompt();
            let system_prompt = conversation.system_prompt().unwrap_or_default().to_string();

            let options = InferenceOptions {
                max_tokens: self.config.thinking_budget.tokens(),
                ..InferenceOptions::default()
            };

            let response = self
                .completion
                .complete(&system_prompt, &prompt, &options)
                .await
                .map_err(|e| ReasoningError::Completion(e.to_string()))?;

            step_number += 1;
            let parsed = parser::parse(&response.text);

            conversation.push_assistant(response.text.clone());

            let (tool_called, tool_input) = match &parsed.action {
                ParsedAction::ToolCall(req) => (Some(req.name.clone()), Some(req.input.clone())),
                ParsedAction::BatchCall(req) => (
                    Some("batch_call".to_string()),
                    Some(serde_json::to_value(req).unwrap_or_default()),
                ),
                _ => (None, None),
            };

            let step = ReasoningStep {
                session_id: session.id,
                step_number,
                reasoning: parsed.thinking.clone(),
                tool_called,
                tool_input,
                token_usage: response.usage.total_tokens,
            };

            if let Err(e) = self.journal.append_step(step).await {
                if self.config.allow_in_memory_fallback {
                    tracing::error!(session_id = %session.id, error = %e, "failed to persist reasoning step; continuing without durability");
                } else {
                    return Err(e);
                }
            }

            match parsed.action {
                ParsedAction::Complete(payload) => {
                    self.journal
                        .update_session_status(session.id, SessionStatus::Completed)
                        .await?;
                    return Ok(LoopOutcome::Completed {
                        session_id: session.id,
                        total_steps: step_number,
                        total_tokens: self.total_tokens(session.id).await,
                        output: payload,
                    });
                }
                ParsedAction::Failed { reason } => {
                    self.journal
                        .update_session_status(session.id, SessionStatus::Failed)
                        .await?;
                    return Ok(LoopOutcome::Failed {
                        session_id: session.id,
                        total_steps: step_number,
                        reason,
                    });
                }
                ParsedAction::HumanNeeded { question, options } => {
                    self.journal
                        .update_session_status(session.id, SessionStatus::Paused)
                        .await?;
                    return Ok(LoopOutcome::HumanNeeded {
                        session_id: session.id,
                        total_steps: step_number,
                        question,
                        options,
                    });
                }
                ParsedAction::ToolCall(req) => {
                    let observation = self.invoke_tool(&req.name, req.input, &tool_ctx).await;
                    conversation.push_tool_result(req.name, observation);
                }
                ParsedAction::BatchCall(req) => {
                    let calls = req
                        .tools
                        .into_iter()
                        .map(|t| ToolCall {
                            name: t.name,
                            input: t.input,
                            priority: t.priority,
                        })
                        .collect();
                    let results = self.tools.execute_parallel(calls, &tool_ctx).await;
                    let summary = serde_json::to_string(
                        &results
                            .iter()
                            .map(|(name, result)| match result {
                                Ok(output) => serde_json::json!({ "name": name, "output": output }),
                                Err(e) => serde_json::json!({ "name": name, "error": e.to_string() }),
                            })
                            .collect::<Vec<_>>(),
                    )
                    .unwrap_or_default();
                    conversation.push_tool_result("batch_call", summary);
                }
                ParsedAction::None => {
                    // Nothing to act on; the loop continues so the model
                    // can self-correct on the next iteration (§4.6 step 5).
                }
            }
        }
    }

    async fn invoke_tool(&self, name: &str, input: serde_json::Value, ctx: &ExecutionContext) -> String {
        if !self.circuit_breaker.allow(name) {
            return format!("ERROR: circuit open for tool '{name}'; not attempting the call");
        }

        match self.tools.execute(name, input, ctx).await {
            Ok(output) => {
                self.circuit_breaker.record_success(name);
                serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
            }
            Err(e) => {
                self.circuit_breaker.record_failure(name);
                format!("ERROR: tool '{name}' failed: {e}")
            }
        }
    }

    /// Exposes the journal's recorded steps for a completed session, for
    /// callers (e.g. the `/orchestrator` SSE transport) that need to replay
    /// the step-by-step trace rather than just the terminal outcome.
    pub async fn list_steps(
        &self,
        session_id: crate::types::SessionId,
    ) -> Result<Vec<ReasoningStep>, ReasoningError> {
        self.journal.list_steps(session_id).await
    }

    async fn total_tokens(&self, session_id: crate::types::SessionId) -> u64 {
        self.journal
            .get_session(session_id)
            .await
            .map(|s| s.total_tokens)
            .unwrap_or(0)
    }

    fn system_prompt(&self, tool_ctx: &ExecutionContext) -> String {
        let tools = self.tools.list(Some(tool_ctx.permission));
        let tool_list = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are an autonomous auditing agent. Respond using the tagged wire format: \
             wrap your reasoning in <thinking>...</thinking>, then emit exactly one of \
             <tool_call>{{\"name\":...,\"input\":...}}</tool_call>, \
             <batch_call>{{\"tools\":[...],\"executionMode\":...}}</batch_call>, \
             <complete>{{...}}</complete>, <human_needed>{{\"question\":...}}</human_needed>, \
             or <failed>{{\"reason\":...}}</failed>.\n\nAvailable tools:\n{tool_list}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::inference::{FinishReason, InferenceError, InferenceResponse, Usage};
    use crate::reasoning::journal::InMemoryReasoningJournal;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedProvider {
        responses: Vec<String>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &InferenceOptions,
        ) -> Result<InferenceResponse, InferenceError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let text = self
                .responses
                .get(idx)
                .cloned()
                .unwrap_or_else(|| self.responses.last().cloned().unwrap_or_default());
            Ok(InferenceResponse {
                text,
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    total_tokens: 20,
                },
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn test_tool_ctx() -> ExecutionContext {
        ExecutionContext {
            user_id: None,
            permission: crate::tools::Permission::Admin,
            preflight: None,
            github_token: None,
            chunk_store: Arc::new(crate::results::sqlite::SqliteChunkStore::open_in_memory().unwrap()),
            http_client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn completes_immediately_on_complete_tag() {
        let runner = ReasoningLoopRunner::new(
            Arc::new(InMemoryReasoningJournal::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(ScriptedProvider {
                responses: vec!["<thinking>done</thinking><complete>{\"ok\":true}</complete>".to_string()],
                call_count: AtomicUsize::new(0),
            }),
            Arc::new(CircuitBreaker::new(3, Duration::from_secs(30))),
            LoopConfig::default(),
        );

        let outcome = runner
            .run("audit the repo".to_string(), None, test_tool_ctx())
            .await
            .unwrap();

        match outcome {
            LoopOutcome::Completed { total_steps, output, .. } => {
                assert_eq!(total_steps, 1);
                assert_eq!(output["ok"], true);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn untagged_reply_self_corrects_then_completes() {
        // S5: first reply has no tags; the loop issues one more iteration.
        let runner = ReasoningLoopRunner::new(
            Arc::new(InMemoryReasoningJournal::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(ScriptedProvider {
                responses: vec![
                    "Sure thing.".to_string(),
                    "<thinking>now I will finish</thinking><complete>{\"ok\":true}</complete>".to_string(),
                ],
                call_count: AtomicUsize::new(0),
            }),
            Arc::new(CircuitBreaker::new(3, Duration::from_secs(30))),
            LoopConfig::default(),
        );

        let outcome = runner
            .run("audit the repo".to_string(), None, test_tool_ctx())
            .await
            .unwrap();

        match outcome {
            LoopOutcome::Completed { total_steps, .. } => assert_eq!(total_steps, 2),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn budget_exhaustion_stops_at_max_iterations() {
        let mut config = LoopConfig::default();
        config.max_iterations = 2;
        let runner = ReasoningLoopRunner::new(
            Arc::new(InMemoryReasoningJournal::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(ScriptedProvider {
                responses: vec!["<thinking>still working</thinking>".to_string()],
                call_count: AtomicUsize::new(0),
            }),
            Arc::new(CircuitBreaker::new(3, Duration::from_secs(30))),
            config,
        );

        let outcome = runner
            .run("audit the repo".to_string(), None, test_tool_ctx())
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::BudgetExhausted { total_steps: 2, .. }));
    }

    #[tokio::test]
    async fn human_needed_pauses_the_session() {
        let runner = ReasoningLoopRunner::new(
            Arc::new(InMemoryReasoningJournal::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(ScriptedProvider {
                responses: vec![
                    "<thinking>blocked</thinking><human_needed>{\"question\":\"which branch?\"}</human_needed>"
                        .to_string(),
                ],
                call_count: AtomicUsize::new(0),
            }),
            Arc::new(CircuitBreaker::new(3, Duration::from_secs(30))),
            LoopConfig::default(),
        );

        let outcome = runner
            .run("audit the repo".to_string(), None, test_tool_ctx())
            .await
            .unwrap();

        match outcome {
            LoopOutcome::HumanNeeded { question, .. } => assert_eq!(question, "which branch?"),
            other => panic!("expected HumanNeeded, got {other:?}"),
        }
    }
}
