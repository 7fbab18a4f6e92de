//! The planner loop: repeatedly prompts the LLM, dispatches the action it
//! returns, and advances run state until the run finishes, is paused for
//! approval, is cancelled, or exhausts its step budget.
//!
//! Grounded step-by-step in the original `_run_planner_steps`: the
//! checkpoint/steps resume formula, the "unknown response costs a step but
//! does not re-query" rule, and the `pending_tool_call` pause-without-execute
//! path for approval-gated tools are all carried with the same meaning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config;
use crate::error::{EngineError, Result};
use crate::model::{PendingToolCall, Run, RunPatch, RunStatus, StepKind, StepRecord};
use crate::store::RunStore;
use crate::toolserver::ToolServerManager;

use super::action::{parse_planner_response, Action};
use super::executor::execute_tool_call;
use super::llm::LlmProvider;
use super::prompt::{build_system_prompt, build_user_prompt};

pub const MAX_PLANNER_STEPS: u32 = 15;

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub llm_timeout: Duration,
    pub tool_timeout: Duration,
    pub prompt_injection_filter_enabled: bool,
}

pub struct PlannerServices {
    pub store: Arc<RunStore>,
    pub tools: Arc<ToolServerManager>,
    pub llm: Arc<dyn LlmProvider>,
    pub settings: PlannerSettings,
}

/// Starts a freshly created run: marks it `running` and executes planner
/// steps from the beginning.
pub async fn run_planner_loop(services: &PlannerServices, run_id: &str) {
    let run = match services.store.require_run(run_id) {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(run_id, error = %e, "run vanished before planner could start");
            return;
        }
    };

    let profile = match config::find_agent_profile(&run.agent_profile_id) {
        Ok(Some(p)) => p,
        Ok(None) => {
            fail_run_without_running(
                services,
                run_id,
                format!("unknown agent profile {}", run.agent_profile_id),
            );
            return;
        }
        Err(e) => {
            fail_run_without_running(services, run_id, e.to_string());
            return;
        }
    };

    // Scenario D (spec §8.4): a profile whose allow-list is empty can never
    // be given a tool to call, so the run fails immediately without ever
    // invoking the LLM. This is a config-level check (the allow-list
    // itself), not a runtime one — a profile that allows servers which
    // simply aren't connected yet is a transport error, not a validation
    // failure, and is left to surface per-call instead.
    if profile.allowed_mcp_servers.is_empty() {
        fail_run_without_running(
            services,
            run_id,
            format!("No tools available for profile {}", run.agent_profile_id),
        );
        return;
    }

    if let Err(e) = services
        .store
        .update_run(run_id, RunPatch::default().status(RunStatus::Running))
    {
        tracing::error!(run_id, error = %e, "failed to mark run running");
        return;
    }
    let _ = services.store.append_event(
        run_id,
        "status",
        json!({ "status": "running" }),
    );

    drive_steps(services, run_id).await;
}

/// Fails a `pending` run directly, without ever transitioning through
/// `running` — used when the run cannot possibly make progress (no tools
/// available, unknown profile).
fn fail_run_without_running(services: &PlannerServices, run_id: &str, error: String) {
    let _ = services.store.update_run(
        run_id,
        RunPatch::default().status(RunStatus::Failed).error(error.clone()).completed_now(),
    );
    let _ = services.store.append_event(
        run_id,
        "status",
        json!({ "status": "failed", "error": error }),
    );
}

/// Resumes a run that is already `running` — used after an HITL approval
/// resumes execution, or after a process restart reloads checkpointed runs.
pub async fn resume_planner_loop(services: &PlannerServices, run_id: &str) -> Result<()> {
    let run = services.store.require_run(run_id)?;
    if run.status != RunStatus::Running {
        return Err(EngineError::InvalidState(format!(
            "cannot resume run {run_id} in status {:?}",
            run.status
        )));
    }
    drive_steps(services, run_id).await;
    Ok(())
}

async fn drive_steps(services: &PlannerServices, run_id: &str) {
    let start_step = match services.store.require_run(run_id) {
        Ok(run) => resume_start_step(&run),
        Err(e) => {
            tracing::error!(run_id, error = %e, "run vanished before planner could start");
            return;
        }
    };

    for step in start_step..=MAX_PLANNER_STEPS {
        let run = match services.store.require_run(run_id) {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(run_id, error = %e, "failed to reload run mid-loop");
                return;
            }
        };

        if run.status == RunStatus::Cancelled {
            return;
        }

        match run_one_step(services, &run, step).await {
            Ok(StepOutcome::Continue) => continue,
            Ok(StepOutcome::Stop) => return,
            Err(e) => {
                tracing::error!(run_id, error = %e, "planner step failed");
                let _ = services.store.update_run(
                    run_id,
                    RunPatch::default()
                        .status(RunStatus::Failed)
                        .error(e.to_string())
                        .completed_now(),
                );
                let _ = services.store.append_event(
                    run_id,
                    "status",
                    json!({ "status": "failed", "error": e.to_string() }),
                );
                return;
            }
        }
    }

    // Spec §4.4/§8.4: exhausting the step budget without an explicit finish
    // is not a failure — the run completes with a fixed fallback answer.
    let fallback_answer = "Reached maximum steps without explicit finish.";
    let _ = services.store.update_run(
        run_id,
        RunPatch::default()
            .status(RunStatus::Completed)
            .answer(fallback_answer)
            .completed_now(),
    );
    let _ = services
        .store
        .append_event(run_id, "status", json!({ "status": "completed" }));
    let _ = services
        .store
        .append_event(run_id, "answer", json!({ "answer": fallback_answer }));
}

/// `checkpoint_step_index` and `len(steps)` can diverge: only `tool_call`
/// steps advance the checkpoint, while `unknown` and the terminal `finish`
/// step do not. Resuming must therefore take the larger of the two, not
/// assume they agree. `step_index` is 1-based and dense, so a fresh run
/// (no checkpoint, no steps) starts at step 1.
fn resume_start_step(run: &Run) -> u32 {
    let from_checkpoint = run.checkpoint_step_index.map(|c| c + 1).unwrap_or(1);
    let from_steps = run.steps.len() as u32 + 1;
    from_checkpoint.max(from_steps)
}

enum StepOutcome {
    Continue,
    Stop,
}

async fn run_one_step(services: &PlannerServices, run: &Run, step: u32) -> Result<StepOutcome> {
    let profile = config::find_agent_profile(&run.agent_profile_id)?
        .ok_or_else(|| EngineError::Validation(format!("unknown agent profile {}", run.agent_profile_id)))?;

    let tools = services.tools.tools_for_profile(&profile).await;
    let system_prompt = build_system_prompt(&profile.role_prompt, &tools);
    let user_prompt = build_user_prompt(&run.goal, &run.steps);

    // Token events are only persisted for runs created with `stream_tokens`
    // (spec §6.1/§9) — otherwise the planner never builds the channel at all.
    let (on_token, token_task) = if run.stream_tokens {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let run_id = run.run_id.clone();
        let store_for_tokens = services.store.clone();
        let task = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                let _ = store_for_tokens.append_event(&run_id, "token", json!({ "text": chunk }));
            }
        });
        (Some(tx), Some(task))
    } else {
        (None, None)
    };

    let completion = tokio::time::timeout(
        services.settings.llm_timeout,
        services.llm.complete(&system_prompt, &user_prompt, on_token),
    )
    .await;
    if let Some(task) = token_task {
        let _ = task.await;
    }

    let raw_response = match completion {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(EngineError::Llm("planner LLM request timed out".into())),
    };

    match parse_planner_response(&raw_response) {
        Action::Unknown { raw } => {
            let mut steps = run.steps.clone();
            steps.push(StepRecord {
                step_index: step,
                kind: StepKind::Unknown,
                tool_call: None,
                finish_answer: None,
                raw_response: Some(raw),
            });
            services
                .store
                .update_run(&run.run_id, RunPatch::default().steps(steps))?;
            services
                .store
                .append_event(&run.run_id, "step", json!({ "step_index": step, "kind": "unknown" }))?;
            Ok(StepOutcome::Continue)
        }
        Action::Finish { answer } => {
            let mut steps = run.steps.clone();
            steps.push(StepRecord {
                step_index: step,
                kind: StepKind::Finish,
                tool_call: None,
                finish_answer: Some(answer.clone()),
                raw_response: None,
            });
            services.store.update_run(
                &run.run_id,
                RunPatch::default()
                    .status(RunStatus::Completed)
                    .answer(answer.clone())
                    .steps(steps)
                    .completed_now(),
            )?;
            services
                .store
                .append_event(&run.run_id, "step", json!({ "step_index": step, "kind": "finish" }))?;
            services
                .store
                .append_event(&run.run_id, "status", json!({ "status": "completed", "answer": answer }))?;
            Ok(StepOutcome::Stop)
        }
        Action::ToolCall {
            server_id,
            tool_name,
            arguments,
        } => {
            if profile.approval_required_tools.iter().any(|t| t == &tool_name) {
                services.store.update_run(
                    &run.run_id,
                    RunPatch::default()
                        .status(RunStatus::AwaitingApproval)
                        .pending_tool_call(PendingToolCall {
                            server_id,
                            tool_name,
                            arguments,
                            step_index: step,
                        }),
                )?;
                services.store.append_event(
                    &run.run_id,
                    "status",
                    json!({ "status": "awaiting_approval" }),
                )?;
                return Ok(StepOutcome::Stop);
            }

            let record = execute_tool_call(
                &services.tools,
                &server_id,
                &tool_name,
                arguments,
                services.settings.tool_timeout,
                services.settings.prompt_injection_filter_enabled,
            )
            .await;

            let mut steps = run.steps.clone();
            steps.push(StepRecord {
                step_index: step,
                kind: StepKind::ToolCall,
                tool_call: Some(record.clone()),
                finish_answer: None,
                raw_response: None,
            });
            let mut tool_calls = run.tool_calls.clone();
            tool_calls.push(record);

            services.store.update_run(
                &run.run_id,
                RunPatch::default()
                    .steps(steps)
                    .tool_calls(tool_calls)
                    .checkpoint_step_index(step),
            )?;
            services
                .store
                .append_event(&run.run_id, "step", json!({ "step_index": step, "kind": "tool_call" }))?;
            Ok(StepOutcome::Continue)
        }
    }
}

/// Applies an HITL approval decision: executes the previously pending tool
/// call (with optional argument modification), records the audit trail,
/// and returns the run to `running` so the caller can resume the loop.
pub async fn execute_approved_tool_and_update_run(
    services: &PlannerServices,
    run_id: &str,
    modified_arguments: Option<serde_json::Value>,
    approver_id: &str,
) -> Result<()> {
    let run = services.store.require_run(run_id)?;
    let pending = run
        .pending_tool_call
        .clone()
        .ok_or_else(|| EngineError::InvalidState(format!("run {run_id} has no pending tool call")))?;

    let arguments = modified_arguments.clone().unwrap_or_else(|| pending.arguments.clone());
    let record = execute_tool_call(
        &services.tools,
        &pending.server_id,
        &pending.tool_name,
        arguments.clone(),
        services.settings.tool_timeout,
        services.settings.prompt_injection_filter_enabled,
    )
    .await;

    let mut steps = run.steps.clone();
    steps.push(StepRecord {
        step_index: pending.step_index,
        kind: StepKind::ToolCall,
        tool_call: Some(record.clone()),
        finish_answer: None,
        raw_response: None,
    });
    let mut tool_calls = run.tool_calls.clone();
    tool_calls.push(record);

    services.store.update_run(
        run_id,
        RunPatch::default()
            .status(RunStatus::Running)
            .steps(steps)
            .tool_calls(tool_calls)
            .checkpoint_step_index(pending.step_index)
            .clear_pending_tool_call(),
    )?;
    services.store.append_event(
        run_id,
        "step",
        json!({ "step_index": pending.step_index, "kind": "tool_call" }),
    )?;
    services
        .store
        .append_event(run_id, "status", json!({ "status": "running" }))?;
    services.store.append_event(
        run_id,
        "audit",
        json!({
            "action": "tool_approved",
            "tool_name": pending.tool_name,
            "server_id": pending.server_id,
            "approver_id": approver_id,
            "arguments_modified": modified_arguments.is_some(),
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )?;

    Ok(())
}

/// Rejects a pending tool call, ending the run.
pub async fn reject_pending_tool_call(
    services: &PlannerServices,
    run_id: &str,
    approver_id: &str,
    reason: Option<&str>,
) -> Result<()> {
    let run = services.store.require_run(run_id)?;
    let pending = run
        .pending_tool_call
        .clone()
        .ok_or_else(|| EngineError::InvalidState(format!("run {run_id} has no pending tool call")))?;

    let error = format!(
        "tool call {}/{} rejected by {approver_id}{}",
        pending.server_id,
        pending.tool_name,
        reason.map(|r| format!(": {r}")).unwrap_or_default()
    );

    services.store.update_run(
        run_id,
        RunPatch::default()
            .status(RunStatus::Failed)
            .error(error)
            .clear_pending_tool_call()
            .completed_now(),
    )?;
    services
        .store
        .append_event(run_id, "status", json!({ "status": "failed" }))?;
    services.store.append_event(
        run_id,
        "audit",
        json!({
            "action": "tool_rejected",
            "tool_name": pending.tool_name,
            "server_id": pending.server_id,
            "approver_id": approver_id,
            "reason": reason,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_profile(dir: &std::path::Path, yaml: &str) {
        let mut f = std::fs::File::create(dir.join("agent_profiles.yaml")).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
    }

    fn services(llm_script: Vec<&str>) -> (tempfile::TempDir, PlannerServices) {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONDUIT_CONFIG_DIR", dir.path());
        write_profile(
            dir.path(),
            "- id: default\n  enabled: true\n  role_prompt: \"You are an SRE agent.\"\n  allowed_mcp_servers: [\"*\"]\n  approval_required_tools: []\n",
        );
        let services = PlannerServices {
            store: Arc::new(RunStore::new(Database::open_in_memory().unwrap())),
            tools: Arc::new(ToolServerManager::new()),
            llm: Arc::new(super::super::llm::MockLlm::new(llm_script)),
            settings: PlannerSettings {
                llm_timeout: Duration::from_secs(5),
                tool_timeout: Duration::from_secs(5),
                prompt_injection_filter_enabled: true,
            },
        };
        (dir, services)
    }

    #[tokio::test]
    async fn run_completes_on_finish_response() {
        let (_dir, services) = services(vec![r#"{"answer": "all clear"}"#]);
        let run = services
            .store
            .create_run("check health", "default", &HashMap::new(), None, false)
            .unwrap();

        run_planner_loop(&services, &run.run_id).await;

        let finished = services.store.require_run(&run.run_id).unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.answer.as_deref(), Some("all clear"));
        assert_eq!(finished.steps.len(), 1);
    }

    #[tokio::test]
    async fn unparseable_response_counts_as_a_step_without_requery_loop() {
        let (_dir, services) = services(vec!["not json at all", r#"{"answer": "done"}"#]);
        let run = services
            .store
            .create_run("goal", "default", &HashMap::new(), None, false)
            .unwrap();

        run_planner_loop(&services, &run.run_id).await;

        let finished = services.store.require_run(&run.run_id).unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.steps.len(), 2);
        assert_eq!(finished.steps[0].kind, StepKind::Unknown);
        assert_eq!(finished.steps[1].kind, StepKind::Finish);
    }

    #[tokio::test]
    async fn exhausting_step_budget_completes_the_run_with_a_fallback_answer() {
        let (_dir, services) = services(vec!["still thinking"]);
        let run = services
            .store
            .create_run("goal", "default", &HashMap::new(), None, false)
            .unwrap();

        run_planner_loop(&services, &run.run_id).await;

        let finished = services.store.require_run(&run.run_id).unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.steps.len(), MAX_PLANNER_STEPS as usize);
        assert_eq!(
            finished.answer.as_deref(),
            Some("Reached maximum steps without explicit finish.")
        );
    }

    #[tokio::test]
    async fn empty_allow_list_fails_immediately_without_calling_the_llm() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONDUIT_CONFIG_DIR", dir.path());
        write_profile(
            dir.path(),
            "- id: default\n  enabled: true\n  role_prompt: \"agent\"\n  allowed_mcp_servers: []\n  approval_required_tools: []\n",
        );
        let services = PlannerServices {
            store: Arc::new(RunStore::new(Database::open_in_memory().unwrap())),
            tools: Arc::new(ToolServerManager::new()),
            // An LLM that always errors: if the loop ever called it, this
            // test would fail for the wrong reason.
            llm: Arc::new(super::super::llm::MockLlm::new(Vec::<String>::new())),
            settings: PlannerSettings {
                llm_timeout: Duration::from_secs(5),
                tool_timeout: Duration::from_secs(5),
                prompt_injection_filter_enabled: true,
            },
        };
        let run = services
            .store
            .create_run("do something", "default", &HashMap::new(), None, false)
            .unwrap();

        run_planner_loop(&services, &run.run_id).await;

        let finished = services.store.require_run(&run.run_id).unwrap();
        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("No tools available"));
        assert!(finished.steps.is_empty());
    }

    #[tokio::test]
    async fn tool_call_requiring_approval_pauses_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONDUIT_CONFIG_DIR", dir.path());
        write_profile(
            dir.path(),
            "- id: default\n  enabled: true\n  role_prompt: \"agent\"\n  allowed_mcp_servers: [\"*\"]\n  approval_required_tools: [\"restart_service\"]\n",
        );
        let services = PlannerServices {
            store: Arc::new(RunStore::new(Database::open_in_memory().unwrap())),
            tools: Arc::new(ToolServerManager::new()),
            llm: Arc::new(super::super::llm::MockLlm::new(vec![
                r#"{"server_id": "ops", "tool_name": "restart_service", "arguments": {}}"#,
            ])),
            settings: PlannerSettings {
                llm_timeout: Duration::from_secs(5),
                tool_timeout: Duration::from_secs(5),
                prompt_injection_filter_enabled: true,
            },
        };
        let run = services
            .store
            .create_run("restart the flaky worker", "default", &HashMap::new(), None, false)
            .unwrap();

        run_planner_loop(&services, &run.run_id).await;

        let paused = services.store.require_run(&run.run_id).unwrap();
        assert_eq!(paused.status, RunStatus::AwaitingApproval);
        assert!(paused.pending_tool_call.is_some());
        assert!(paused.steps.is_empty());
    }

    #[test]
    fn resume_start_step_takes_the_larger_of_checkpoint_and_steps_len() {
        let mut run = Run {
            run_id: "r".into(),
            goal: "g".into(),
            agent_profile_id: "default".into(),
            status: RunStatus::Running,
            context: HashMap::new(),
            steps: vec![],
            tool_calls: vec![],
            stream_tokens: false,
            pending_tool_call: None,
            checkpoint_step_index: Some(3),
            answer: None,
            error: None,
            request_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        assert_eq!(resume_start_step(&run), 4);

        run.checkpoint_step_index = None;
        run.steps = vec![
            StepRecord {
                step_index: 0,
                kind: StepKind::Unknown,
                tool_call: None,
                finish_answer: None,
                raw_response: Some(String::new()),
            };
            2
        ];
        assert_eq!(resume_start_step(&run), 3);
    }
}
