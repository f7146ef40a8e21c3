//! Three-phase pipeline (C5): Planner → parallel Workers → Coordinator.

pub mod coordinator;
pub mod planner;
pub mod scoring;
pub mod worker;

use std::sync::Arc;

use chrono::Utc;

use crate::config::{canonicalize_tier, CoreConfig};
use crate::preflight::PreflightStore;
use crate::reasoning::providers::cloud::CloudCompletionClient;
use crate::results::{ChunkStore, NewAudit};
use crate::status::{StatusChannel, StatusState, TokenUsage as StatusTokenUsage, WorkerProgress};
use crate::types::{AuditId, PipelineError, PreflightId};

/// Everything the pipeline needs that isn't part of the job/task itself.
pub struct PipelineContext {
    pub preflight_store: Arc<dyn PreflightStore>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub status: Arc<dyn StatusChannel>,
    pub completion_client: Option<Arc<CloudCompletionClient>>,
    pub config: Arc<CoreConfig>,
}

/// Runs all three phases for a single job and returns the job's `output`
/// (the persisted audit id plus its report), per §4.5 and §4.8.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    preflight_id: PreflightId,
    tier_raw: &str,
    user_id: Option<String>,
) -> Result<serde_json::Value, PipelineError> {
    let tier = canonicalize_tier(tier_raw)
        .ok_or_else(|| PipelineError::UnknownTier(tier_raw.to_string()))?;

    let preflight = ctx.preflight_store.get(preflight_id).await?;
    let preflight = Arc::new(preflight);

    check_cancelled(ctx, preflight_id).await?;

    // Phase 1 — Planner
    ctx.status
        .update(
            preflight_id,
            Some("planning"),
            Box::new(|r| {
                r.current_step = Some("planning".to_string());
                r.progress = 5;
            }),
        )
        .await;

    let tier_prompt = ctx
        .config
        .tier_prompts
        .get(tier)
        .unwrap_or("Audit this repository.")
        .to_string();

    let (plan, planner_usage) = planner::plan(
        ctx.completion_client.as_deref(),
        &preflight,
        tier,
        &tier_prompt,
    )
    .await?;

    let plan_value = serde_json::to_value(&plan).unwrap_or_default();
    let planner_tokens = planner_usage.tokens;
    ctx.status
        .update(
            preflight_id,
            Some("plan generated"),
            Box::new(move |r| {
                r.plan_data = Some(plan_value);
                r.token_usage.planner = planner_tokens;
                r.progress = 15;
            }),
        )
        .await;

    check_cancelled(ctx, preflight_id).await?;

    // Phase 2 — Workers
    let status = ctx.status.clone();
    let on_progress = move |done: usize, total: usize| {
        let status = status.clone();
        let pct = worker::worker_progress_percent(done, total);
        let entry = WorkerProgress {
            worker_id: format!("worker-{done}"),
            status: "completed".to_string(),
            progress: 100,
            started_at: None,
            completed_at: Some(Utc::now()),
        };
        tokio::spawn(async move {
            status
                .update(
                    preflight_id,
                    None,
                    Box::new(move |r| {
                        r.progress = pct;
                        r.worker_progress.push(entry);
                    }),
                )
                .await;
        });
    };

    let worker_results = worker::run_workers(
        ctx.completion_client.clone(),
        preflight.clone(),
        plan.tasks.clone(),
        on_progress,
    )
    .await;

    check_cancelled(ctx, preflight_id).await?;

    // Phase 3 — Coordinator
    ctx.status
        .update(
            preflight_id,
            Some("synthesizing report"),
            Box::new(|r| {
                r.current_step = Some("coordinating".to_string());
                r.progress = 85;
            }),
        )
        .await;

    let (report, worker_tokens) =
        coordinator::coordinate(&worker_results, tier, preflight.file_count as usize);

    let audit_id = AuditId::new();
    let total_tokens = planner_usage.tokens + worker_tokens;
    let issues_json: Vec<serde_json::Value> = report
        .issues
        .iter()
        .map(|i| serde_json::to_value(i).unwrap_or_default())
        .collect();
    let extra_data = serde_json::json!({
        "platformStack": plan.platform_stack,
        "categoryAssessments": report.category_assessments,
        "seniorDeveloperAssessment": report.senior_developer_assessment,
        "overallVerdict": report.overall_verdict,
        "topStrengths": report.top_strengths,
        "suspiciousFiles": report.suspicious_files,
    });

    ctx.chunk_store
        .create_audit(
            audit_id,
            NewAudit {
                user_id: user_id.clone(),
                repo_url: preflight.repo_url.clone(),
                tier: tier.to_string(),
                health_score: report.health_score,
                summary: report.summary.clone(),
                total_tokens,
                estimated_tokens: None,
            },
        )
        .await?;
    ctx.chunk_store
        .store_audit_results(audit_id, &issues_json, &extra_data)
        .await?;

    let prior_audits = ctx
        .chunk_store
        .list_for_repo(&preflight.repo_url)
        .await
        .unwrap_or_default();
    let health_score = report.health_score;
    let risk_level = report.risk_level.clone();
    let production_ready = report.production_ready;
    let report_value = serde_json::to_value(&report).unwrap_or_default();

    ctx.status
        .update(
            preflight_id,
            Some("completed"),
            Box::new(move |r| {
                r.status = StatusState::Completed;
                r.report_data = Some(report_value);
                r.token_usage.coordinator = 0;
                r.token_usage.workers = worker_tokens;
                r.progress = 100;
                r.completed_at = Some(Utc::now());
            }),
        )
        .await;

    Ok(serde_json::json!({
        "auditId": audit_id.to_string(),
        "healthScore": health_score,
        "riskLevel": risk_level,
        "productionReady": production_ready,
        "totalTokens": total_tokens,
        "priorAudits": prior_audits,
    }))
}

async fn check_cancelled(ctx: &PipelineContext, preflight_id: PreflightId) -> Result<(), PipelineError> {
    if let Some(record) = ctx.status.get(preflight_id).await {
        if record.cancel_requested {
            return Err(PipelineError::Cancelled);
        }
    }
    Ok(())
}

pub fn status_token_usage_from_report(planner: u64, workers: u64, coordinator: u64) -> StatusTokenUsage {
    StatusTokenUsage {
        planner,
        workers,
        coordinator,
    }
}
