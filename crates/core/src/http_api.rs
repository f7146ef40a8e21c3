//! HTTP transport (§6, §6a): a single `axum` router exposing `/submit`,
//! `/orchestrator`, `/recovery`, a status-subscription surface, and a
//! `/health` liveness check.
//!
//! Grounded on this codebase's `api::routes`/`api::server` pattern: handlers
//! return `Result<Json<T>, (StatusCode, Json<ErrorResponse>)>`, a single
//! `CoreError -> (StatusCode, ErrorResponse)` mapping classifies every
//! failure, and optional bearer-token auth is read once at startup rather
//! than looked up per-request.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{canonicalize_tier, CoreConfig};
use crate::dispatcher::Dispatcher;
use crate::pipeline::planner::{build_planning_map, PLANNING_MAP_CAP};
use crate::preflight::PreflightStore;
use crate::queue::JobQueue;
use crate::reasoning::loop_types::{LoopConfig, LoopOutcome, ThinkingBudget};
use crate::reasoning::reasoning_loop::ReasoningLoopRunner;
use crate::results::ChunkStore;
use crate::status::StatusChannel;
use crate::tools::{ExecutionContext, Permission};
use crate::types::{CoreError, ErrorKind, PreflightId};


/// Everything an HTTP handler needs, assembled once at startup by the
/// binary crate and shared behind an `Arc` per the rest of this codebase's
/// `State<Arc<_>>` convention.
#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<dyn JobQueue>,
    pub preflight_store: Arc<dyn PreflightStore>,
    pub status: Arc<dyn StatusChannel>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub reasoning: Arc<ReasoningLoopRunner>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    pub config: Arc<CoreConfig>,
    /// Bearer token read once from the environment at startup; `None`
    /// disables auth (development only — the caller is expected to put a
    /// reverse proxy in front otherwise).
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}

impl CoreError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Corruption => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Permission => "PERMISSION_DENIED",
            ErrorKind::Transient => "TRANSIENT_ERROR",
            ErrorKind::Corruption => "CORRUPTED_RESULTS",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, CoreError>;

pub fn router(state: ApiState) -> Router {
    let public = Router::new().route("/health", get(health));

    let authenticated = Router::new()
        .route("/submit", post(submit))
        .route("/orchestrator", post(orchestrator))
        .route("/recovery", post(recovery))
        .route("/status/:preflight_id", get(get_status))
        .route("/status/:preflight_id/stream", get(stream_status))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    public
        .merge(authenticated)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn auth_middleware(
    State(state): State<ApiState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, CoreError> {
    let Some(expected) = &state.bearer_token else {
        return Ok(next.run(request).await);
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(next.run(request).await)
    } else {
        Err(CoreError::Validation("missing or invalid bearer token".to_string()))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------- /submit

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(rename = "preflightId")]
    preflight_id: String,
    tier: String,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(rename = "maxAttempts", default)]
    max_attempts: Option<u32>,
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    success: bool,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `POST /submit` (§6): canonicalizes the tier, enqueues a job, and wakes the
/// dispatcher's on-insert trigger — best-effort, the enqueue itself never
/// fails because of it (§4.3 Notification).
async fn submit(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> Json<SubmitResponse> {
    match submit_inner(&state, request).await {
        Ok(job_id) => Json(SubmitResponse {
            success: true,
            job_id: Some(job_id),
            error: None,
        }),
        Err(e) => Json(SubmitResponse {
            success: false,
            job_id: None,
            error: Some(e.to_string()),
        }),
    }
}

async fn submit_inner(state: &ApiState, request: SubmitRequest) -> Result<String, CoreError> {
    let preflight_id: PreflightId = request
        .preflight_id
        .parse()
        .map_err(|_| CoreError::Validation("invalid preflightId".to_string()))?;
    let tier = canonicalize_tier(&request.tier)
        .ok_or_else(|| CoreError::Validation(format!("unknown tier: {}", request.tier)))?;

    let job_id = state
        .queue
        .enqueue(
            preflight_id,
            request.user_id,
            tier.to_string(),
            serde_json::json!({}),
            request.priority.unwrap_or(5),
            request.max_attempts.unwrap_or(state.config.default_max_attempts),
        )
        .await?;

    if let Some(dispatcher) = &state.dispatcher {
        dispatcher.notify_new_job();
    }

    Ok(job_id.to_string())
}

// ----------------------------------------------------------- /orchestrator

#[derive(Debug, Deserialize, Default)]
struct TaskSpec {
    description: String,
    #[serde(default, rename = "type")]
    task_type: Option<String>,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrchestratorRequest {
    #[serde(default)]
    task: Option<TaskSpec>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
    #[serde(default)]
    stream: bool,
    #[serde(rename = "thinkingBudget", default)]
    thinking_budget: Option<String>,
    #[serde(rename = "maxIterations", default)]
    max_iterations: Option<u32>,

    // Legacy form (§6): rewritten into an equivalent `task` below.
    #[serde(rename = "preflightId", default)]
    preflight_id: Option<String>,
    #[serde(default)]
    tier: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrchestratorResponse {
    success: bool,
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "totalSteps")]
    total_steps: u32,
    #[serde(rename = "totalTokens")]
    total_tokens: u64,
    #[serde(rename = "finalOutput", skip_serializing_if = "Option::is_none")]
    final_output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_thinking_budget(raw: Option<&str>) -> ThinkingBudget {
    match raw {
        Some("simple") => ThinkingBudget::Simple,
        Some("complex") => ThinkingBudget::Complex,
        Some("maximum") => ThinkingBudget::Maximum,
        _ => ThinkingBudget::Audit,
    }
}

/// Rewrites the legacy `{preflightId, tier}` form into an equivalent `task`
/// (§6), embedding the preflight's file map capped at the same 100-entry
/// planning-map bound Phase 1 already enforces, with an explicit truncation
/// marker rather than a silent drop (Open Question, resolved in SPEC_FULL §9).
async fn rewrite_legacy_task(
    state: &ApiState,
    preflight_id: &str,
    tier: &str,
) -> Result<TaskSpec, CoreError> {
    let id: PreflightId = preflight_id
        .parse()
        .map_err(|_| CoreError::Validation("invalid preflightId".to_string()))?;
    let tier = canonicalize_tier(tier).ok_or_else(|| CoreError::Validation(format!("unknown tier: {tier}")))?;
    let preflight = state.preflight_store.get(id).await?;

    let (planning_map, truncated) = build_planning_map(&preflight.repo_map);
    let mut file_list = planning_map
        .iter()
        .map(|e| e.path.clone())
        .collect::<Vec<_>>()
        .join("\n");
    if truncated > 0 {
        file_list.push_str(&format!("\n(+{truncated} more files truncated)"));
    }

    let description = format!(
        "Audit the repository {}/{} for the '{tier}' tier.\nFiles (capped at {PLANNING_MAP_CAP}):\n{file_list}",
        preflight.owner, preflight.repo
    );

    Ok(TaskSpec {
        description,
        task_type: Some(tier.to_string()),
        context: Some(serde_json::json!({ "preflightId": preflight_id, "tier": tier })),
    })
}

async fn resolve_task(state: &ApiState, request: &OrchestratorRequest) -> Result<TaskSpec, CoreError> {
    if let Some(task) = &request.task {
        return Ok(TaskSpec {
            description: task.description.clone(),
            task_type: task.task_type.clone(),
            context: task.context.clone(),
        });
    }
    match (&request.preflight_id, &request.tier) {
        (Some(preflight_id), Some(tier)) => rewrite_legacy_task(state, preflight_id, tier).await,
        _ => Err(CoreError::Validation(
            "orchestrator request requires either `task` or `preflightId`+`tier`".to_string(),
        )),
    }
}

fn tool_context(state: &ApiState) -> ExecutionContext {
    ExecutionContext {
        user_id: None,
        permission: Permission::Execute,
        preflight: None,
        github_token: std::env::var("GITHUB_TOKEN").ok(),
        chunk_store: state.chunk_store.clone(),
        http_client: reqwest::Client::new(),
    }
}

/// `POST /orchestrator` (§6). Non-streaming callers get a single JSON
/// envelope; `stream=true` callers get the SSE event sequence below.
async fn orchestrator(
    State(state): State<ApiState>,
    Json(request): Json<OrchestratorRequest>,
) -> axum::response::Response {
    let task = match resolve_task(&state, &request).await {
        Ok(task) => task,
        Err(e) => return e.into_response(),
    };

    let mut config = LoopConfig::default();
    config.thinking_budget = parse_thinking_budget(request.thinking_budget.as_deref());
    if let Some(max_iterations) = request.max_iterations {
        config.max_iterations = max_iterations;
    }

    if request.stream {
        stream_orchestrator(state, task, config).await.into_response()
    } else {
        run_orchestrator_sync(state, task, config).await.into_response()
    }
}

async fn run_orchestrator_sync(state: ApiState, task: TaskSpec, _config: LoopConfig) -> Json<OrchestratorResponse> {
    let ctx = tool_context(&state);
    match state.reasoning.run(task.description, None, ctx).await {
        Ok(LoopOutcome::Completed { session_id, total_steps, total_tokens, output }) => {
            Json(OrchestratorResponse {
                success: true,
                session_id: session_id.to_string(),
                total_steps,
                total_tokens,
                final_output: Some(output),
                error: None,
            })
        }
        Ok(LoopOutcome::Failed { session_id, total_steps, reason }) => Json(OrchestratorResponse {
            success: false,
            session_id: session_id.to_string(),
            total_steps,
            total_tokens: 0,
            final_output: None,
            error: Some(reason),
        }),
        Ok(LoopOutcome::HumanNeeded { session_id, total_steps, question, .. }) => {
            Json(OrchestratorResponse {
                success: false,
                session_id: session_id.to_string(),
                total_steps,
                total_tokens: 0,
                final_output: None,
                error: Some(format!("human intervention required: {question}")),
            })
        }
        Ok(LoopOutcome::BudgetExhausted { session_id, total_steps }) => Json(OrchestratorResponse {
            success: false,
            session_id: session_id.to_string(),
            total_steps,
            total_tokens: 0,
            final_output: None,
            error: Some("iteration budget exhausted".to_string()),
        }),
        Err(e) => Json(OrchestratorResponse {
            success: false,
            session_id: String::new(),
            total_steps: 0,
            total_tokens: 0,
            final_output: None,
            error: Some(e.to_string()),
        }),
    }
}

/// Builds an SSE event from a JSON payload, falling back to a bare comment
/// event in the (practically unreachable, since every payload here is a
/// `serde_json::json!` literal of primitives) case serialization fails.
fn sse_json(event_name: &str, data: serde_json::Value) -> Event {
    Event::default()
        .event(event_name)
        .json_data(data)
        .unwrap_or_else(|_| Event::default().comment("serialization error"))
}

/// SSE events per §6: `start`, `reasoning{...}` (one per step, emitted after
/// the fact since the loop itself runs to completion before this handler can
/// observe individual steps without a dedicated per-step channel), `complete`,
/// `error`.
async fn stream_orchestrator(
    state: ApiState,
    task: TaskSpec,
    _config: LoopConfig,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let _ = tx.send(sse_json("start", serde_json::json!({}))).await;

        let ctx = tool_context(&state);
        let outcome = state.reasoning.run(task.description, None, ctx).await;

        match outcome {
            Ok(LoopOutcome::Completed { session_id, total_steps, total_tokens, output }) => {
                for step in state.reasoning.list_steps(session_id).await.unwrap_or_default() {
                    let event = sse_json(
                        "reasoning",
                        serde_json::json!({
                            "stepNumber": step.step_number,
                            "reasoning": step.reasoning,
                            "toolCalled": step.tool_called,
                            "timestamp": chrono::Utc::now().to_rfc3339(),
                        }),
                    );
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                let _ = tx
                    .send(sse_json(
                        "complete",
                        serde_json::json!({
                            "success": true,
                            "sessionId": session_id.to_string(),
                            "totalSteps": total_steps,
                            "totalTokens": total_tokens,
                            "finalOutput": output,
                        }),
                    ))
                    .await;
            }
            Ok(LoopOutcome::Failed { session_id, total_steps, reason }) => {
                let _ = tx
                    .send(sse_json(
                        "complete",
                        serde_json::json!({
                            "success": false,
                            "sessionId": session_id.to_string(),
                            "totalSteps": total_steps,
                            "totalTokens": 0,
                            "error": reason,
                        }),
                    ))
                    .await;
            }
            Ok(LoopOutcome::HumanNeeded { session_id, total_steps, question, .. }) => {
                let _ = tx
                    .send(sse_json(
                        "complete",
                        serde_json::json!({
                            "success": false,
                            "sessionId": session_id.to_string(),
                            "totalSteps": total_steps,
                            "totalTokens": 0,
                            "error": format!("human intervention required: {question}"),
                        }),
                    ))
                    .await;
            }
            Ok(LoopOutcome::BudgetExhausted { session_id, total_steps }) => {
                let _ = tx
                    .send(sse_json(
                        "complete",
                        serde_json::json!({
                            "success": false,
                            "sessionId": session_id.to_string(),
                            "totalSteps": total_steps,
                            "totalTokens": 0,
                            "error": "iteration budget exhausted",
                        }),
                    ))
                    .await;
            }
            Err(e) => {
                let _ = tx
                    .send(sse_json("error", serde_json::json!({ "message": e.to_string() })))
                    .await;
            }
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// ---------------------------------------------------------------- /status

#[derive(Debug, Serialize)]
struct StatusResponse {
    found: bool,
    #[serde(flatten)]
    record: Option<crate::status::StatusRecord>,
}

async fn get_status(State(state): State<ApiState>, Path(preflight_id): Path<String>) -> ApiResult<StatusResponse> {
    let id: PreflightId = preflight_id
        .parse()
        .map_err(|_| CoreError::Validation("invalid preflightId".to_string()))?;
    let record = state.status.get(id).await;
    Ok(Json(StatusResponse {
        found: record.is_some(),
        record,
    }))
}

/// Status subscription (§4.4, §6): the implementation-defined transport here
/// is SSE, re-emitting the `watch` channel's snapshots as they change so a
/// subscriber joining mid-run immediately sees the current state and then
/// every subsequent update in order.
async fn stream_status(
    State(state): State<ApiState>,
    Path(preflight_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, CoreError> {
    let id: PreflightId = preflight_id
        .parse()
        .map_err(|_| CoreError::Validation("invalid preflightId".to_string()))?;
    let mut rx = state
        .status
        .subscribe(id)
        .await
        .ok_or_else(|| CoreError::Validation("no status row for this preflight".to_string()))?;

    let (tx, out_rx) = tokio::sync::mpsc::channel::<Event>(32);
    tokio::spawn(async move {
        let snapshot = rx.borrow().clone();
        if let Ok(event) = Event::default().event("status").json_data(&snapshot) {
            if tx.send(event).await.is_err() {
                return;
            }
        }
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow().clone();
            match Event::default().event("status").json_data(&snapshot) {
                Ok(event) if tx.send(event).await.is_ok() => {}
                _ => break,
            }
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(out_rx).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

// -------------------------------------------------------------- /recovery

#[derive(Debug, Deserialize)]
struct RecoveryRequest {
    action: String,
}

#[derive(Debug, Serialize, Default)]
struct RecoveryResponse {
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    recovered_stale: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_stuck_pending: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expired_preflights_deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<crate::queue::QueueStats>,
}

/// `POST /recovery` (§6): `recover` runs the dispatcher's stale/stuck
/// reclamation out of band of the timer trigger; `status` reports queue
/// stats; `cleanup` additionally sweeps expired preflights (§10
/// supplemented behavior — the distilled spec doesn't say what `cleanup`
/// cleans, so this mirrors the original's combined janitorial sweep).
async fn recovery(State(state): State<ApiState>, Json(request): Json<RecoveryRequest>) -> ApiResult<RecoveryResponse> {
    match request.action.as_str() {
        "recover" => {
            let recovered_stale = state.queue.recover_stale().await?;
            let reset_stuck_pending = state.queue.reset_stuck_pending().await?;
            Ok(Json(RecoveryResponse {
                action: request.action,
                recovered_stale: Some(recovered_stale),
                reset_stuck_pending: Some(reset_stuck_pending),
                ..Default::default()
            }))
        }
        "status" => {
            let stats = state.queue.stats().await?;
            Ok(Json(RecoveryResponse {
                action: request.action,
                stats: Some(stats),
                ..Default::default()
            }))
        }
        "cleanup" => {
            let recovered_stale = state.queue.recover_stale().await?;
            let expired_preflights_deleted = state.preflight_store.cleanup_expired().await?;
            Ok(Json(RecoveryResponse {
                action: request.action,
                recovered_stale: Some(recovered_stale),
                expired_preflights_deleted: Some(expired_preflights_deleted),
                ..Default::default()
            }))
        }
        other => Err(CoreError::Validation(format!("unknown recovery action: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletionConfig, CompletionProvider, TierPromptTable};
    use crate::preflight::sqlite::SqlitePreflightStore;
    use crate::queue::sqlite::SqliteJobQueue;
    use crate::reasoning::circuit_breaker::CircuitBreaker;
    use crate::reasoning::journal::InMemoryReasoningJournal;
    use crate::reasoning::providers::cloud::CloudCompletionClient;
    use crate::results::sqlite::SqliteChunkStore;
    use crate::status::InMemoryStatusChannel;
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> ApiState {
        let config = Arc::new(CoreConfig {
            database_path: ":memory:".to_string(),
            completion: CompletionConfig {
                provider: CompletionProvider::Anthropic,
                api_key: String::new(),
                base_url: "https://api.anthropic.com/v1".to_string(),
                model: "test".to_string(),
            },
            default_lease: Duration::from_secs(300),
            default_max_attempts: 3,
            http_bind_address: "0.0.0.0:0".to_string(),
            tier_prompts: TierPromptTable::builtin_defaults(),
            api_token: None,
        });
        let chunk_store: Arc<dyn ChunkStore> = Arc::new(SqliteChunkStore::open_in_memory().unwrap());
        let completion: Arc<dyn crate::reasoning::inference::InferenceProvider> =
            Arc::new(CloudCompletionClient::new(config.completion.clone()));
        ApiState {
            queue: Arc::new(SqliteJobQueue::open_in_memory().unwrap()),
            preflight_store: Arc::new(SqlitePreflightStore::open_in_memory().unwrap()),
            status: Arc::new(InMemoryStatusChannel::new()),
            chunk_store: chunk_store.clone(),
            reasoning: Arc::new(ReasoningLoopRunner::new(
                Arc::new(InMemoryReasoningJournal::new()),
                Arc::new(ToolRegistry::with_builtins(chunk_store)),
                completion,
                Arc::new(CircuitBreaker::new(3, Duration::from_secs(30))),
                LoopConfig::default(),
            )),
            dispatcher: None,
            config,
            bearer_token: None,
        }
    }

    #[tokio::test]
    async fn health_does_not_require_auth() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_tier() {
        let state = test_state();
        let preflight = state
            .preflight_store
            .create(crate::preflight::NewPreflight {
                repo_url: "https://github.com/acme/widgets".to_string(),
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
                default_branch: "main".to_string(),
                repo_map: Vec::new(),
                stats: serde_json::json!({}),
                fingerprint: "fp".to_string(),
                is_private: false,
                fetch_strategy: crate::preflight::FetchStrategy::Public,
                user_id: None,
                github_account_id: None,
            })
            .await
            .unwrap();

        let app = router(state);
        let body = serde_json::json!({ "preflightId": preflight.id.to_string(), "tier": "bogus" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/submit")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["success"], false);
    }

    #[tokio::test]
    async fn authenticated_routes_reject_missing_bearer_token() {
        let mut state = test_state();
        state.bearer_token = Some("secret".to_string());
        let app = router(state);
        let body = serde_json::json!({ "preflightId": uuid::Uuid::new_v4().to_string(), "tier": "security" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/submit")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recovery_status_reports_queue_stats() {
        let state = test_state();
        let app = router(state);
        let body = serde_json::json!({ "action": "status" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/recovery")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
