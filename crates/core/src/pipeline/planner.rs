//! Phase 1 — Planner. Filters the full repository map down to a bounded
//! planning map, detects the platform stack, and (for paid tiers) asks the
//! completion service for a task breakdown.

use serde::{Deserialize, Serialize};

use crate::preflight::{Preflight, RepoMapEntry};
use crate::reasoning::providers::cloud::CloudCompletionClient;
use crate::types::PipelineError;

/// Hard cap on the planning file map, reused as-is by the legacy `/orchestrator`
/// rewrite's file-map embedding (§6).
pub const PLANNING_MAP_CAP: usize = 100;

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "kt", "rb", "php", "c", "cpp", "h", "hpp",
    "cs", "swift", "sql",
];
const BUILD_CONFIG_NAMES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "Gemfile",
    "pom.xml",
    "build.gradle",
    "Dockerfile",
    "docker-compose.yml",
    "next.config.js",
    "vite.config.ts",
    "tsconfig.json",
];
const EXCLUDED_DIR_PREFIXES: &[&str] = &[
    "node_modules/",
    "vendor/",
    "dist/",
    "build/",
    ".git/",
    "target/",
    "coverage/",
];
const EXCLUDED_SUFFIXES: &[&str] = &[
    ".lock", ".md", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformStack {
    Supabase,
    Firebase,
    Prisma,
    Drizzle,
    GraphQl,
    Docker,
}

impl PlatformStack {
    fn as_str(&self) -> &'static str {
        match self {
            PlatformStack::Supabase => "supabase",
            PlatformStack::Firebase => "firebase",
            PlatformStack::Prisma => "prisma",
            PlatformStack::Drizzle => "drizzle",
            PlatformStack::GraphQl => "graphql",
            PlatformStack::Docker => "docker",
        }
    }
}

/// Detects the platform stack by filename heuristics over the **full** map
/// (not the filtered planning map), per §4.5 Phase 1.
pub fn detect_platform_stack(repo_map: &[RepoMapEntry]) -> Vec<&'static str> {
    let mut detected = Vec::new();
    let has = |needle: &str| repo_map.iter().any(|e| e.path.contains(needle));

    if has("supabase/") || has("supabase.toml") {
        detected.push(PlatformStack::Supabase.as_str());
    }
    if has("firebase.json") || has("firestore.rules") {
        detected.push(PlatformStack::Firebase.as_str());
    }
    if has("prisma/schema.prisma") {
        detected.push(PlatformStack::Prisma.as_str());
    }
    if has("drizzle.config") {
        detected.push(PlatformStack::Drizzle.as_str());
    }
    if has(".graphql") || has("schema.gql") {
        detected.push(PlatformStack::GraphQl.as_str());
    }
    if has("Dockerfile") || has("docker-compose") {
        detected.push(PlatformStack::Docker.as_str());
    }
    detected
}

fn is_source_like(entry: &RepoMapEntry) -> bool {
    let lower = entry.path.to_ascii_lowercase();
    if EXCLUDED_DIR_PREFIXES.iter().any(|p| lower.starts_with(p) || lower.contains(&format!("/{p}"))) {
        return false;
    }
    if EXCLUDED_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return false;
    }
    if BUILD_CONFIG_NAMES
        .iter()
        .any(|n| lower.ends_with(&n.to_ascii_lowercase()))
    {
        return true;
    }
    SOURCE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Builds the bounded planning map (§4.5 Phase 1): include source/build/config
/// files, exclude docs/lockfiles/vendor/binaries, keep a representative
/// sample per directory beyond the cap, bounded at `PLANNING_MAP_CAP`.
pub fn build_planning_map(repo_map: &[RepoMapEntry]) -> (Vec<RepoMapEntry>, usize) {
    let candidates: Vec<&RepoMapEntry> = repo_map.iter().filter(|e| is_source_like(e)).collect();

    if candidates.len() <= PLANNING_MAP_CAP {
        return (candidates.into_iter().cloned().collect(), 0);
    }

    // Representative sampling: walk directories round-robin so no single
    // directory crowds out the rest of the cap.
    use std::collections::BTreeMap;
    let mut by_dir: BTreeMap<String, Vec<&RepoMapEntry>> = BTreeMap::new();
    for entry in &candidates {
        let dir = entry
            .path
            .rsplit_once('/')
            .map(|(d, _)| d.to_string())
            .unwrap_or_default();
        by_dir.entry(dir).or_default().push(entry);
    }

    let mut sampled = Vec::with_capacity(PLANNING_MAP_CAP);
    let mut round = 0;
    'outer: loop {
        let mut progressed = false;
        for entries in by_dir.values() {
            if let Some(entry) = entries.get(round) {
                sampled.push((*entry).clone());
                progressed = true;
                if sampled.len() >= PLANNING_MAP_CAP {
                    break 'outer;
                }
            }
        }
        if !progressed {
            break;
        }
        round += 1;
    }

    let truncated = candidates.len().saturating_sub(sampled.len());
    (sampled, truncated)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: String,
    pub role: String,
    pub instruction: String,
    pub target_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub focus_area: String,
    pub tasks: Vec<WorkerTask>,
    pub platform_stack: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenUsage {
    pub tokens: u64,
}

/// Runs Phase 1. The free/structural tier always gets a single static
/// `MetadataAnalyst` task with no target files; paid tiers ask the
/// completion service for a breakdown.
pub async fn plan(
    client: Option<&CloudCompletionClient>,
    preflight: &Preflight,
    tier: &str,
    tier_prompt: &str,
) -> Result<(Plan, TokenUsage), PipelineError> {
    let platform_stack = detect_platform_stack(&preflight.repo_map)
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    if tier == "shape" {
        return Ok((
            Plan {
                focus_area: "repository structure".to_string(),
                tasks: vec![WorkerTask {
                    id: "metadata-analyst".to_string(),
                    role: "MetadataAnalyst".to_string(),
                    instruction: "Summarize repository structure and conventions.".to_string(),
                    target_files: Vec::new(),
                }],
                platform_stack,
            },
            TokenUsage::default(),
        ));
    }

    let (planning_map, truncated) = build_planning_map(&preflight.repo_map);
    if truncated > 0 {
        tracing::info!(truncated, "planning map truncated to cap");
    }

    let client = client.ok_or_else(|| {
        PipelineError::Completion("no completion client configured for planning".to_string())
    })?;

    let file_list = planning_map
        .iter()
        .map(|e| e.path.clone())
        .collect::<Vec<_>>()
        .join("\n");
    let user_prompt = format!(
        "Repository: {}/{}\nPlatform stack: {:?}\nFiles:\n{}\n\nProduce a JSON object {{focusArea, tasks:[{{id,role,instruction,targetFiles}}]}}.",
        preflight.owner, preflight.repo, platform_stack, file_list
    );

    let (text, tokens) = client
        .complete(tier_prompt, &user_prompt)
        .await
        .map_err(|e| PipelineError::Completion(e.to_string()))?;

    let parsed: serde_json::Value = extract_json_object(&text)
        .ok_or_else(|| PipelineError::Completion("planner did not return JSON".to_string()))?;

    let focus_area = parsed
        .get("focusArea")
        .and_then(|v| v.as_str())
        .unwrap_or("general review")
        .to_string();
    let tasks: Vec<WorkerTask> = parsed
        .get("tasks")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| serde_json::from_value(t.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    Ok((
        Plan {
            focus_area,
            tasks,
            platform_stack,
        },
        TokenUsage { tokens },
    ))
}

fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return serde_json::from_str(&text[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> RepoMapEntry {
        RepoMapEntry {
            path: path.to_string(),
            size: 100,
            entry_type: "file".to_string(),
            url: String::new(),
        }
    }

    #[test]
    fn excludes_docs_and_vendor() {
        let map = vec![
            entry("README.md"),
            entry("node_modules/lib/index.js"),
            entry("src/main.rs"),
        ];
        let (planning, _) = build_planning_map(&map);
        assert_eq!(planning.len(), 1);
        assert_eq!(planning[0].path, "src/main.rs");
    }

    #[test]
    fn caps_at_100_entries() {
        let map: Vec<_> = (0..250).map(|i| entry(&format!("src/mod{i}/file.rs"))).collect();
        let (planning, truncated) = build_planning_map(&map);
        assert_eq!(planning.len(), PLANNING_MAP_CAP);
        assert_eq!(truncated, 150);
    }

    #[test]
    fn detects_supabase_stack() {
        let map = vec![entry("supabase/config.toml"), entry("src/main.rs")];
        let stacks = detect_platform_stack(&map);
        assert!(stacks.contains(&"supabase"));
    }
}
