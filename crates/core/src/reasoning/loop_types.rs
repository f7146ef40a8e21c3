//! Shared types for the reasoning loop: configuration, session/step/
//! checkpoint records (§2 Domain model), and the loop's outcome shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reasoning::context_manager::ContextStrategy;
use crate::types::SessionId;

/// Thinking-budget hints passed to the completion call (§4.6); the loop
/// does not enforce these locally, it only forwards them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingBudget {
    Simple,
    Audit,
    Complex,
    Maximum,
}

impl ThinkingBudget {
    pub fn tokens(self) -> u32 {
        match self {
            ThinkingBudget::Simple => 4096,
            ThinkingBudget::Audit => 8192,
            ThinkingBudget::Complex => 16384,
            ThinkingBudget::Maximum => 24576,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub thinking_budget: ThinkingBudget,
    pub context_strategy: ContextStrategy,
    pub context_token_budget: usize,
    /// Whether an in-memory session/step fallback is acceptable when the
    /// journal cannot be persisted (§4.6 step 4).
    pub allow_in_memory_fallback: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            thinking_budget: ThinkingBudget::Audit,
            context_strategy: ContextStrategy::SlidingWindow,
            context_token_budget: 8000,
            allow_in_memory_fallback: true,
        }
    }
}

/// Terminal result of running a reasoning loop to completion.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    Completed {
        session_id: SessionId,
        total_steps: u32,
        total_tokens: u64,
        output: serde_json::Value,
    },
    Failed {
        session_id: SessionId,
        total_steps: u32,
        reason: String,
    },
    HumanNeeded {
        session_id: SessionId,
        total_steps: u32,
        question: String,
        options: Option<Vec<String>>,
    },
    BudgetExhausted {
        session_id: SessionId,
        total_steps: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningSession {
    pub id: SessionId,
    pub task_description: String,
    pub status: SessionStatus,
    pub user_id: Option<String>,
    pub total_steps: u32,
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub session_id: SessionId,
    pub step_number: u32,
    pub reasoning: String,
    pub tool_called: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub token_usage: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningCheckpoint {
    pub session_id: SessionId,
    pub step_number: u32,
    pub context_snapshot: serde_json::Value,
    pub last_successful_tool: Option<String>,
    pub recovery_strategies: Vec<String>,
}
