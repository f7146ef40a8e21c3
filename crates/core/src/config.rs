//! Typed configuration, loaded from environment variables (with optional
//! `.env` support via `dotenvy`), matching the auto-detection convention
//! already used by the completion client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub database_path: String,
    pub completion: CompletionConfig,
    pub default_lease: Duration,
    pub default_max_attempts: u32,
    pub http_bind_address: String,
    pub tier_prompts: TierPromptTable,
    /// Bearer token the HTTP surface requires on its authenticated routes.
    /// `None` (the default when unset) disables auth, matching the
    /// runtime's own "no token configured" fallback for local development.
    pub api_token: Option<String>,
}

impl CoreConfig {
    /// Load configuration from the process environment. Calls `dotenvy::dotenv()`
    /// first so a local `.env` file can seed the environment in development;
    /// a missing `.env` file is not an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let database_path = std::env::var("AUDITD_DATABASE_PATH").unwrap_or_else(|_| {
            dirs::data_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("auditd")
                .join("core.db")
                .to_string_lossy()
                .into_owned()
        });

        let http_bind_address =
            std::env::var("AUDITD_HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let default_lease = std::env::var("AUDITD_LEASE_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let default_max_attempts = std::env::var("AUDITD_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let tier_prompts = std::env::var("AUDITD_TIER_PROMPTS_PATH")
            .ok()
            .map(|path| TierPromptTable::load_from_file(&path))
            .transpose()?
            .unwrap_or_else(TierPromptTable::builtin_defaults);

        let api_token = std::env::var("AUDITD_API_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Self {
            database_path,
            completion: CompletionConfig::from_env(),
            default_lease,
            default_max_attempts,
            http_bind_address,
            tier_prompts,
            api_token,
        })
    }
}

/// Completion-service provider selection, mirroring the auto-detection
/// precedence of the runtime's LLM client: OpenRouter, then OpenAI, then
/// Anthropic.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub provider: CompletionProvider,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionProvider {
    OpenRouter,
    OpenAI,
    Anthropic,
}

impl std::fmt::Display for CompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionProvider::OpenRouter => write!(f, "OpenRouter"),
            CompletionProvider::OpenAI => write!(f, "OpenAI"),
            CompletionProvider::Anthropic => write!(f, "Anthropic"),
        }
    }
}

impl CompletionConfig {
    pub fn from_env() -> Self {
        if let Ok(api_key) = std::env::var("OPENROUTER_API_KEY") {
            return Self {
                provider: CompletionProvider::OpenRouter,
                api_key,
                base_url: std::env::var("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
                model: std::env::var("OPENROUTER_MODEL")
                    .unwrap_or_else(|_| "anthropic/claude-sonnet-4".to_string()),
            };
        }
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            return Self {
                provider: CompletionProvider::OpenAI,
                api_key,
                base_url: std::env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            };
        }
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        Self {
            provider: CompletionProvider::Anthropic,
            api_key,
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string()),
            model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250514".to_string()),
        }
    }
}

/// A tier name (`shape`, `conventions`, `performance`, `security`,
/// `supabase_deep_dive`) mapped to its planner system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierPromptTable {
    pub prompts: HashMap<String, String>,
}

impl TierPromptTable {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        if path.ends_with(".toml") {
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }

    /// A minimal built-in table so the core runs without external config in
    /// development; production deployments are expected to supply
    /// `AUDITD_TIER_PROMPTS_PATH`.
    pub fn builtin_defaults() -> Self {
        let mut prompts = HashMap::new();
        for tier in ["shape", "conventions", "performance", "security", "supabase_deep_dive"] {
            prompts.insert(
                tier.to_string(),
                format!(
                    "You are auditing a repository for the '{tier}' tier. Produce a focused plan."
                ),
            );
        }
        Self { prompts }
    }

    pub fn get(&self, tier: &str) -> Option<&str> {
        self.prompts.get(tier).map(String::as_str)
    }
}

/// Canonicalizes caller-supplied tier names per §6: `lite`/`deep`/`ultra`
/// are legacy aliases, everything else is an exhaustive identity match so an
/// unrecognized tier is a validation error rather than a silent default.
pub fn canonicalize_tier(raw: &str) -> Option<&'static str> {
    match raw {
        "lite" => Some("shape"),
        "deep" => Some("conventions"),
        "ultra" => Some("security"),
        "shape" => Some("shape"),
        "conventions" => Some("conventions"),
        "performance" => Some("performance"),
        "security" => Some("security"),
        "supabase_deep_dive" => Some("supabase_deep_dive"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_canonicalize() {
        assert_eq!(canonicalize_tier("lite"), Some("shape"));
        assert_eq!(canonicalize_tier("deep"), Some("conventions"));
        assert_eq!(canonicalize_tier("ultra"), Some("security"));
    }

    #[test]
    fn identity_tiers_canonicalize() {
        for tier in ["shape", "conventions", "performance", "security", "supabase_deep_dive"] {
            assert_eq!(canonicalize_tier(tier), Some(tier));
        }
    }

    #[test]
    fn unknown_tier_is_none() {
        assert_eq!(canonicalize_tier("bogus"), None);
    }

    #[test]
    fn builtin_defaults_cover_every_tier() {
        let table = TierPromptTable::builtin_defaults();
        for tier in ["shape", "conventions", "performance", "security", "supabase_deep_dive"] {
            assert!(table.get(tier).is_some());
        }
        assert!(table.get("bogus").is_none());
    }

    #[test]
    fn load_from_file_supports_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("prompts.json");
        std::fs::write(&json_path, r#"{"prompts": {"shape": "be concise"}}"#).unwrap();
        let json_table = TierPromptTable::load_from_file(json_path.to_str().unwrap()).unwrap();
        assert_eq!(json_table.get("shape"), Some("be concise"));

        let toml_path = dir.path().join("prompts.toml");
        std::fs::write(&toml_path, "[prompts]\nshape = \"be concise\"\n").unwrap();
        let toml_table = TierPromptTable::load_from_file(toml_path.to_str().unwrap()).unwrap();
        assert_eq!(toml_table.get("shape"), Some("be concise"));
    }
}
