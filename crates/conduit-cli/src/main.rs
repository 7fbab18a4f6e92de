//! Thin CLI: parses flags, builds the engine container, and starts the
//! HTTP server.
//!
//! Grounded in the teacher CLI's `main.rs`/`serve.rs` shape — `clap::Parser`
//! command enum, `tracing_subscriber::fmt().with_env_filter(...)` init — but
//! generalized to full SIGTERM-aware graceful shutdown (handled inside
//! `conduit_server::start_server`) rather than the teacher's `ctrl_c`-only
//! handling.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use conduit_core::config::Settings;
use conduit_core::planner::{HttpLlmProvider, LlmProvider};
use conduit_core::Container;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conduit", version, about = "Run execution engine for tool-using LLM agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the HTTP API server.
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Runs the Redis-backed queue worker loop instead of the HTTP server.
    /// Only meaningful when built with the `redis-queue` feature and
    /// `RUN_QUEUE_URL` configured; otherwise runs have nothing to pop since
    /// the server dispatches them in-process.
    Worker,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

fn build_llm_provider() -> Arc<dyn LlmProvider> {
    let base_url =
        std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
    let api_key = std::env::var("LLM_API_KEY").ok();
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "llama3".to_string());
    Arc::new(HttpLlmProvider::new(base_url, api_key, model))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port } => {
            let settings = Settings::from_env();
            let llm = build_llm_provider();
            let container = Arc::new(Container::build(settings, llm).await?);
            conduit_server::start_server(container, conduit_server::ServerConfig { port }).await?;
        }
        Commands::Worker => {
            let settings = Settings::from_env();
            let llm = build_llm_provider();
            let container = Container::build(settings, llm).await?;
            run_worker(container).await?;
        }
    }

    Ok(())
}

#[cfg(feature = "redis-queue")]
async fn run_worker(container: Container) -> anyhow::Result<()> {
    let url = container
        .settings
        .run_queue_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("RUN_QUEUE_URL must be set to run the worker"))?;
    let cfg = deadpool_redis::Config::from_url(url);
    let pool = cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    tracing::info!("conduit worker started, waiting for queued runs");
    conduit_core::queue::redis_queue::run_worker_loop(pool, container.planner.clone()).await
}

#[cfg(not(feature = "redis-queue"))]
async fn run_worker(_container: Container) -> anyhow::Result<()> {
    anyhow::bail!("the worker command requires the `redis-queue` feature")
}
