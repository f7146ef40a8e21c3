//! `auditd`: the binary that wires `auditd-core`'s durable queue, reasoning
//! loop, and pipeline together into a runnable service, plus a couple of
//! one-shot operator commands (`submit`, `recover`) for talking to the same
//! stores without going through the HTTP surface.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use auditd_core::config::CoreConfig;
use auditd_core::dispatcher::{Dispatcher, DispatcherConfig};
use auditd_core::pipeline::PipelineContext;
use auditd_core::reasoning::circuit_breaker::CircuitBreaker;
use auditd_core::reasoning::journal::ReasoningJournal;
use auditd_core::reasoning::loop_types::LoopConfig;
use auditd_core::reasoning::providers::cloud::CloudCompletionClient;
use auditd_core::reasoning::reasoning_loop::ReasoningLoopRunner;
use auditd_core::results::ChunkStore;
use auditd_core::status::{InMemoryStatusChannel, StatusChannel};
use auditd_core::tools::ToolRegistry;
use auditd_core::{
    JobQueue, SqliteChunkStore, SqliteJobQueue, SqlitePreflightStore, SqliteReasoningJournal,
};

#[derive(Parser)]
#[command(name = "auditd", version, about = "Durable job queue and LLM-guided audit pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher loop, and the HTTP API if the `http-api` feature
    /// is enabled, until interrupted.
    Serve,
    /// Enqueue a single audit job for an already-snapshotted preflight.
    Submit {
        preflight_id: String,
        tier: String,
        #[arg(long, default_value_t = 5)]
        priority: u8,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Run one of the recovery actions (§4.8, §9) against the queue and
    /// preflight store directly.
    Recover {
        /// `recover` (stale leases + stuck pending), `status` (queue
        /// stats only), or `cleanup` (stale leases + expired preflights).
        action: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Arc::new(CoreConfig::from_env().context("loading configuration")?);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Submit {
            preflight_id,
            tier,
            priority,
            max_attempts,
            user_id,
        } => submit(config, preflight_id, tier, priority, max_attempts, user_id).await,
        Command::Recover { action } => recover(config, action).await,
    }
}

/// Opens the on-disk SQLite stores the rest of the binary shares, per
/// `CoreConfig::database_path`. A single physical file backs all four
/// stores, matching the teacher's single-`rusqlite`-connection-per-store
/// convention (each store opens its own connection against the same path).
struct Stores {
    queue: Arc<dyn JobQueue>,
    preflight_store: Arc<dyn auditd_core::preflight::PreflightStore>,
    chunk_store: Arc<dyn ChunkStore>,
    journal: Arc<dyn ReasoningJournal>,
}

fn open_stores(config: &CoreConfig) -> anyhow::Result<Stores> {
    std::fs::create_dir_all(
        std::path::Path::new(&config.database_path)
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    )
    .context("creating database directory")?;

    let queue: Arc<dyn JobQueue> =
        Arc::new(SqliteJobQueue::open(&config.database_path).context("opening job queue")?);
    let preflight_store = Arc::new(
        SqlitePreflightStore::open(&config.database_path).context("opening preflight store")?,
    );
    let chunk_store: Arc<dyn ChunkStore> = Arc::new(
        SqliteChunkStore::open(&config.database_path).context("opening chunk store")?,
    );
    let journal: Arc<dyn ReasoningJournal> = Arc::new(
        SqliteReasoningJournal::open(&config.database_path).context("opening reasoning journal")?,
    );

    Ok(Stores {
        queue,
        preflight_store,
        chunk_store,
        journal,
    })
}

async fn serve(config: Arc<CoreConfig>) -> anyhow::Result<()> {
    let stores = open_stores(&config)?;
    let status: Arc<dyn StatusChannel> = Arc::new(InMemoryStatusChannel::new());

    let completion_client = if config.completion.api_key.is_empty() {
        tracing::warn!(
            provider = %config.completion.provider,
            "no completion API key configured; pipeline runs will use planner/worker placeholders"
        );
        None
    } else {
        Some(Arc::new(CloudCompletionClient::new(config.completion.clone())))
    };

    let pipeline_ctx = Arc::new(PipelineContext {
        preflight_store: stores.preflight_store.clone(),
        chunk_store: stores.chunk_store.clone(),
        status: status.clone(),
        completion_client: completion_client.clone(),
        config: config.clone(),
    });

    let dispatcher = Arc::new(Dispatcher::new(
        stores.queue.clone(),
        pipeline_ctx,
        DispatcherConfig {
            lease: config.default_lease,
            ..DispatcherConfig::default()
        },
    ));

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let dispatcher_task = tokio::spawn(dispatcher.clone().run_forever(shutdown.clone()));

    #[cfg(feature = "http-api")]
    {
        let tools = Arc::new(ToolRegistry::with_builtins(stores.chunk_store.clone()));
        let completion: Arc<dyn auditd_core::reasoning::inference::InferenceProvider> =
            match completion_client.clone() {
                Some(client) => client,
                None => Arc::new(CloudCompletionClient::new(config.completion.clone())),
            };
        let reasoning = Arc::new(ReasoningLoopRunner::new(
            stores.journal.clone(),
            tools,
            completion,
            Arc::new(CircuitBreaker::new(5, std::time::Duration::from_secs(60))),
            LoopConfig::default(),
        ));

        let state = auditd_core::http_api::ApiState {
            queue: stores.queue.clone(),
            preflight_store: stores.preflight_store.clone(),
            status: status.clone(),
            chunk_store: stores.chunk_store.clone(),
            reasoning,
            dispatcher: Some(dispatcher.clone()),
            config: config.clone(),
            bearer_token: config.api_token.clone(),
        };

        let app = auditd_core::http_api::router(state);
        let listener = tokio::net::TcpListener::bind(&config.http_bind_address)
            .await
            .with_context(|| format!("binding HTTP listener on {}", config.http_bind_address))?;
        tracing::info!(address = %config.http_bind_address, "HTTP API listening");

        tokio::select! {
            result = axum::serve(listener, app) => {
                result.context("HTTP server exited")?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
            }
        }
        shutdown.notify_one();
    }

    #[cfg(not(feature = "http-api"))]
    {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        tracing::info!("received ctrl-c, shutting down");
        shutdown.notify_one();
    }

    dispatcher_task.await.context("dispatcher task panicked")?;
    Ok(())
}

async fn submit(
    config: Arc<CoreConfig>,
    preflight_id: String,
    tier: String,
    priority: u8,
    max_attempts: Option<u32>,
    user_id: Option<String>,
) -> anyhow::Result<()> {
    let preflight_id: auditd_core::types::PreflightId =
        preflight_id.parse().context("parsing preflightId")?;
    let canonical_tier = auditd_core::config::canonicalize_tier(&tier)
        .with_context(|| format!("unknown tier '{tier}'"))?;

    let stores = open_stores(&config)?;
    let job_id = stores
        .queue
        .enqueue(
            preflight_id,
            user_id,
            canonical_tier.to_string(),
            serde_json::json!({}),
            priority,
            max_attempts.unwrap_or(config.default_max_attempts),
        )
        .await
        .context("enqueueing job")?;

    println!("{}", serde_json::json!({ "jobId": job_id.to_string() }));
    Ok(())
}

async fn recover(config: Arc<CoreConfig>, action: String) -> anyhow::Result<()> {
    let stores = open_stores(&config)?;

    let report = match action.as_str() {
        "recover" => {
            let recovered_stale = stores.queue.recover_stale().await.context("recovering stale leases")?;
            let reset_stuck_pending = stores
                .queue
                .reset_stuck_pending()
                .await
                .context("resetting stuck pending jobs")?;
            serde_json::json!({
                "action": "recover",
                "recoveredStale": recovered_stale,
                "resetStuckPending": reset_stuck_pending,
            })
        }
        "status" => {
            let stats = stores.queue.stats().await.context("reading queue stats")?;
            serde_json::json!({ "action": "status", "stats": stats })
        }
        "cleanup" => {
            let recovered_stale = stores.queue.recover_stale().await.context("recovering stale leases")?;
            let expired_preflights_deleted = stores
                .preflight_store
                .cleanup_expired()
                .await
                .context("cleaning up expired preflights")?;
            serde_json::json!({
                "action": "cleanup",
                "recoveredStale": recovered_stale,
                "expiredPreflightsDeleted": expired_preflights_deleted,
            })
        }
        other => anyhow::bail!("unknown recovery action '{other}' (expected recover, status, or cleanup)"),
    };

    println!("{report}");
    Ok(())
}
