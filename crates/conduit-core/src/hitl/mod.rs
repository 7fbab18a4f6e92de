//! HITL Approval Gate: the thin surface the API layer calls into to approve
//! or reject a run's pending tool call. The actual execution/audit-trail
//! work lives in `planner::execute_approved_tool_and_update_run` and
//! `planner::reject_pending_tool_call` — this module is the stable, narrow
//! entry point the server's route handlers depend on.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::model::{PendingToolCall, RunStatus};
use crate::planner::{self, PlannerServices};

pub struct HitlGate {
    services: Arc<PlannerServices>,
}

impl HitlGate {
    pub fn new(services: Arc<PlannerServices>) -> Self {
        Self { services }
    }

    pub fn pending_tool_call(&self, run_id: &str) -> Result<Option<PendingToolCall>> {
        let run = self.services.store.require_run(run_id)?;
        if run.status != RunStatus::AwaitingApproval {
            return Ok(None);
        }
        Ok(run.pending_tool_call)
    }

    /// Approves the pending tool call, executes it, and resumes the
    /// planner loop in the background. Returns once the approval has been
    /// durably recorded — the caller does not wait for the run to finish.
    pub async fn approve(
        &self,
        run_id: &str,
        modified_arguments: Option<Value>,
        approver_id: &str,
    ) -> Result<()> {
        let run = self.services.store.require_run(run_id)?;
        if run.status != RunStatus::AwaitingApproval {
            return Err(EngineError::InvalidState(format!(
                "run {run_id} is not awaiting approval"
            )));
        }

        planner::execute_approved_tool_and_update_run(&self.services, run_id, modified_arguments, approver_id)
            .await?;

        let services = self.services.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = planner::resume_planner_loop(&services, &run_id).await {
                tracing::error!(run_id, error = %e, "failed to resume run after approval");
            }
        });

        Ok(())
    }

    pub async fn reject(&self, run_id: &str, approver_id: &str, reason: Option<&str>) -> Result<()> {
        let run = self.services.store.require_run(run_id)?;
        if run.status != RunStatus::AwaitingApproval {
            return Err(EngineError::InvalidState(format!(
                "run {run_id} is not awaiting approval"
            )));
        }
        planner::reject_pending_tool_call(&self.services, run_id, approver_id, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{MockLlm, PlannerSettings};
    use crate::store::{Database, RunStore};
    use crate::toolserver::ToolServerManager;
    use std::collections::HashMap;
    use std::time::Duration;

    fn gate() -> (tempfile::TempDir, HitlGate, Arc<RunStore>) {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONDUIT_CONFIG_DIR", dir.path());
        std::fs::write(
            dir.path().join("agent_profiles.yaml"),
            "- id: default\n  enabled: true\n  role_prompt: \"agent\"\n  allowed_mcp_servers: [\"*\"]\n  approval_required_tools: [\"restart_service\"]\n",
        )
        .unwrap();

        let store = Arc::new(RunStore::new(Database::open_in_memory().unwrap()));
        let services = Arc::new(PlannerServices {
            store: store.clone(),
            tools: Arc::new(ToolServerManager::new()),
            llm: Arc::new(MockLlm::new(Vec::<String>::new())),
            settings: PlannerSettings {
                llm_timeout: Duration::from_secs(5),
                tool_timeout: Duration::from_secs(5),
                prompt_injection_filter_enabled: true,
            },
        });
        (dir, HitlGate::new(services), store)
    }

    #[tokio::test]
    async fn reject_marks_run_failed_and_clears_pending_call() {
        let (_dir, gate, store) = gate();
        let run = store
            .create_run("restart worker", "default", &HashMap::new(), None, false)
            .unwrap();
        store
            .update_run(
                &run.run_id,
                crate::model::RunPatch::default()
                    .status(RunStatus::AwaitingApproval)
                    .pending_tool_call(PendingToolCall {
                        server_id: "ops".into(),
                        tool_name: "restart_service".into(),
                        arguments: Value::Null,
                        step_index: 0,
                    }),
            )
            .unwrap();

        gate.reject(&run.run_id, "oncall-1", Some("too risky")).await.unwrap();

        let rejected = store.require_run(&run.run_id).unwrap();
        assert_eq!(rejected.status, RunStatus::Failed);
        assert!(rejected.pending_tool_call.is_none());
        assert!(rejected.error.unwrap().contains("rejected by oncall-1"));
    }

    #[tokio::test]
    async fn approve_requires_awaiting_approval_status() {
        let (_dir, gate, store) = gate();
        let run = store
            .create_run("goal", "default", &HashMap::new(), None, false)
            .unwrap();
        let result = gate.approve(&run.run_id, None, "oncall-1").await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
    }
}
