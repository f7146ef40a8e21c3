//! Phase 2 — Workers. Each planner task is run independently; a worker
//! failure never aborts the pipeline, it degrades to a placeholder result
//! that the coordinator tolerates (§4.5 Phase 2).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pipeline::planner::WorkerTask;
use crate::preflight::Preflight;
use crate::reasoning::providers::cloud::CloudCompletionClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: String,
    pub findings: serde_json::Value,
    pub token_usage: u64,
}

/// Bound on worker fan-out concurrency (§5: "overall concurrency is
/// bounded").
pub const MAX_CONCURRENT_WORKERS: usize = 5;

pub async fn run_worker(
    client: Option<&CloudCompletionClient>,
    preflight: &Preflight,
    task: &WorkerTask,
) -> WorkerResult {
    match run_worker_fallible(client, preflight, task).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(task_id = %task.id, error = %err, "worker task failed, using placeholder");
            WorkerResult {
                task_id: task.id.clone(),
                findings: serde_json::json!({
                    "error": true,
                    "message": err,
                }),
                token_usage: 0,
            }
        }
    }
}

async fn run_worker_fallible(
    client: Option<&CloudCompletionClient>,
    preflight: &Preflight,
    task: &WorkerTask,
) -> Result<WorkerResult, String> {
    let client = client.ok_or("no completion client configured")?;

    let files_context = task
        .target_files
        .iter()
        .take(20)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");

    let system_prompt = format!(
        "You are a {} reviewing the repository {}/{}. Return a JSON object {{issues:[...]}}.",
        task.role, preflight.owner, preflight.repo
    );
    let user_prompt = format!("{}\n\nTarget files:\n{}", task.instruction, files_context);

    let (text, tokens) = client
        .complete(&system_prompt, &user_prompt)
        .await
        .map_err(|e| e.to_string())?;

    let findings: serde_json::Value = serde_json::from_str(&text)
        .unwrap_or_else(|_| serde_json::json!({"issues": [], "raw": text}));

    Ok(WorkerResult {
        task_id: task.id.clone(),
        findings,
        token_usage: tokens,
    })
}

/// Runs all tasks, fanned out with bounded concurrency, and reports linear
/// progress 15% → 85% as each completes via `on_progress`.
pub async fn run_workers<F>(
    client: Option<Arc<CloudCompletionClient>>,
    preflight: Arc<Preflight>,
    tasks: Vec<WorkerTask>,
    on_progress: F,
) -> Vec<WorkerResult>
where
    F: Fn(usize, usize) + Send + Sync,
{
    use futures::stream::{self, StreamExt};

    let total = tasks.len().max(1);
    let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let on_progress = Arc::new(on_progress);

    stream::iter(tasks.into_iter().map(|task| {
        let client = client.clone();
        let preflight = preflight.clone();
        let completed = completed.clone();
        let on_progress = on_progress.clone();
        async move {
            let result = run_worker(client.as_deref(), &preflight, &task).await;
            let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            on_progress(done, total);
            result
        }
    }))
    .buffer_unordered(MAX_CONCURRENT_WORKERS)
    .collect()
    .await
}

/// Maps worker-completion count to the linear 15% → 85% progress band (§4.5
/// Phase 2, scenario S6).
pub fn worker_progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 85;
    }
    let fraction = completed as f64 / total as f64;
    (15.0 + fraction * 70.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_band_matches_scenario_s6() {
        assert_eq!(worker_progress_percent(0, 3), 15);
        assert_eq!(worker_progress_percent(1, 3), 38);
        assert_eq!(worker_progress_percent(2, 3), 62);
        assert_eq!(worker_progress_percent(3, 3), 85);
    }
}
