//! Run Queue: decouples "a run was created" from "a worker is executing
//! it". When `RUN_QUEUE_URL` is unset, `enqueue` always returns `false` and
//! the caller falls back to spawning the planner loop in-process via
//! `tokio::spawn`, mirroring the teacher's `AgenticOrchestrator::run`
//! spawn-and-return pattern. When set, jobs are pushed to Redis for a
//! separate worker process to pick up — the closest idiomatic equivalent
//! this stack has to the original's arq-based queue, which has no Rust
//! counterpart.

use serde::{Deserialize, Serialize};

/// The job envelope a worker consumes to resume a run. Intentionally
/// minimal: the worker reloads the run from the store rather than trusting
/// a stale copy of its goal/context in the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: String,
}

#[async_trait::async_trait]
pub trait RunQueue: Send + Sync {
    /// Attempts to enqueue `run_id` for out-of-process execution. Returns
    /// `false` (never an error) when no queue is configured or the enqueue
    /// attempt itself fails — either way the caller's fallback is to run
    /// the planner loop in-process.
    async fn enqueue(&self, run_id: &str) -> bool;
}

/// Always declines — used when `RUN_QUEUE_URL` is unset.
pub struct NoQueue;

#[async_trait::async_trait]
impl RunQueue for NoQueue {
    async fn enqueue(&self, _run_id: &str) -> bool {
        false
    }
}

#[cfg(feature = "redis-queue")]
pub mod redis_queue {
    use super::*;
    use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};

    pub const QUEUE_KEY: &str = "conduit:run_queue";

    pub struct RedisQueue {
        pool: Pool,
    }

    impl RedisQueue {
        pub fn connect(url: &str) -> anyhow::Result<Self> {
            let cfg = Config::from_url(url);
            let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
            Ok(Self { pool })
        }
    }

    #[async_trait::async_trait]
    impl RunQueue for RedisQueue {
        async fn enqueue(&self, run_id: &str) -> bool {
            let job = RunJob {
                run_id: run_id.to_string(),
            };
            let Ok(payload) = serde_json::to_string(&job) else {
                return false;
            };
            let Ok(mut conn) = self.pool.get().await else {
                tracing::warn!("run queue enqueue failed: could not get redis connection");
                return false;
            };
            match conn.lpush::<_, _, ()>(QUEUE_KEY, payload).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "run queue enqueue failed");
                    false
                }
            }
        }
    }

    /// Blocks on the queue and resumes one run per popped job, reloading it
    /// from the store rather than trusting anything in the envelope beyond
    /// `run_id`. Runs until the pool itself starts failing; a separate
    /// process is expected to run this loop (`conduit serve --worker`, or a
    /// dedicated worker binary), decoupled from the HTTP process that enqueues.
    pub async fn run_worker_loop(
        pool: Pool,
        services: std::sync::Arc<crate::planner::PlannerServices>,
    ) -> anyhow::Result<()> {
        loop {
            let mut conn = pool.get().await?;
            let popped: Option<(String, String)> =
                conn.blpop(QUEUE_KEY, 5.0).await.unwrap_or(None);
            let Some((_key, payload)) = popped else {
                continue;
            };
            let job: RunJob = match serde_json::from_str(&payload) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unparseable run queue job");
                    continue;
                }
            };
            let services = services.clone();
            tokio::spawn(async move {
                crate::planner::run_planner_loop(&services, &job.run_id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_queue_always_declines() {
        let q = NoQueue;
        assert!(!q.enqueue("run-1").await);
    }
}
