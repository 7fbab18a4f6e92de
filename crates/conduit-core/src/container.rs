//! The engine's explicit service container, constructed once at startup and
//! threaded through the server and CLI rather than reached for via
//! module-level singletons — the redesign the design notes call for so
//! tests can substitute a `MockLlm`/in-memory store without touching
//! global state.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::Result;
use crate::planner::{LlmProvider, PlannerServices, PlannerSettings};
use crate::queue::{NoQueue, RunQueue};
use crate::store::RunStore;
use crate::toolserver::ToolServerManager;

pub struct Container {
    pub store: Arc<RunStore>,
    pub tools: Arc<ToolServerManager>,
    pub queue: Arc<dyn RunQueue>,
    pub planner: Arc<PlannerServices>,
    pub settings: Settings,
}

impl Container {
    /// Builds the container from runtime settings and an already-selected
    /// LLM provider, connecting to every enabled tool server along the way.
    /// Tool servers that fail to connect are logged and skipped rather than
    /// aborting startup.
    pub async fn build(settings: Settings, llm: Arc<dyn LlmProvider>) -> Result<Self> {
        let store = Arc::new(RunStore::open(&settings.database_url)?);
        let tools = Arc::new(ToolServerManager::new());

        let servers = crate::config::enabled_tool_servers()?;
        tools.connect_all(&servers).await;

        let queue: Arc<dyn RunQueue> = build_queue(&settings);

        let planner = Arc::new(PlannerServices {
            store: store.clone(),
            tools: tools.clone(),
            llm,
            settings: PlannerSettings {
                llm_timeout: Duration::from_secs(settings.planner_llm_timeout_seconds),
                tool_timeout: Duration::from_secs(settings.planner_tool_timeout_seconds),
                prompt_injection_filter_enabled: settings.prompt_injection_filter_enabled,
            },
        });

        Ok(Self {
            store,
            tools,
            queue,
            planner,
            settings,
        })
    }

    /// Starts a run: enqueues it on the distributed queue if configured,
    /// otherwise spawns the planner loop in-process.
    pub fn dispatch(&self, run_id: &str) {
        let queue = self.queue.clone();
        let planner = self.planner.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            if queue.enqueue(&run_id).await {
                return;
            }
            crate::planner::run_planner_loop(&planner, &run_id).await;
        });
    }
}

#[cfg(not(feature = "redis-queue"))]
fn build_queue(_settings: &Settings) -> Arc<dyn RunQueue> {
    Arc::new(NoQueue)
}

#[cfg(feature = "redis-queue")]
fn build_queue(settings: &Settings) -> Arc<dyn RunQueue> {
    match &settings.run_queue_url {
        Some(url) => match crate::queue::redis_queue::RedisQueue::connect(url) {
            Ok(q) => Arc::new(q),
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect run queue; falling back to in-process execution");
                Arc::new(NoQueue)
            }
        },
        None => Arc::new(NoQueue),
    }
}
