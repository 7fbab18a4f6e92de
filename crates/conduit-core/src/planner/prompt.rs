//! Assembles the system and user prompts sent to the LLM on each planner
//! step.
//!
//! Grounded in `_run_planner_steps`'s prompt construction: a system prompt
//! combining the agent profile's role prompt, the available-tools listing,
//! the structural instruction, and a JSON-schema instruction; a user prompt
//! wrapping the goal in delimiters followed by recent conversation history.

use crate::model::{StepKind, StepRecord, ToolInfo};
use crate::safety::prompt_injection::{STRUCTURAL_INSTRUCTION, USER_GOAL_END, USER_GOAL_START};

const JSON_SCHEMA_INSTRUCTION: &str = "\
Respond with exactly one JSON object and nothing else. To call a tool, \
respond with {\"server_id\": \"...\", \"tool_name\": \"...\", \"arguments\": {...}}. \
To finish the run, respond with {\"answer\": \"...\"}.";

const HISTORY_LINES: usize = 10;

pub fn build_system_prompt(role_prompt: &str, tools: &[ToolInfo]) -> String {
    let tools_text = if tools.is_empty() {
        "No tools are available for this run.".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}/{}: {}", t.server_id, t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!("{role_prompt}\n\nAvailable tools:\n{tools_text}\n\n{STRUCTURAL_INSTRUCTION}\n\n{JSON_SCHEMA_INSTRUCTION}")
}

pub fn build_user_prompt(goal: &str, steps: &[StepRecord]) -> String {
    let history = steps
        .iter()
        .rev()
        .take(HISTORY_LINES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(summarize_step)
        .collect::<Vec<_>>()
        .join("\n");

    let history_block = if history.is_empty() {
        String::new()
    } else {
        format!("\n\nConversation so far:\n{history}")
    };

    format!("{USER_GOAL_START}\n{goal}\n{USER_GOAL_END}{history_block}\n\nWhat is the next action?")
}

fn summarize_step(step: &StepRecord) -> String {
    match step.kind {
        StepKind::ToolCall => {
            if let Some(tc) = &step.tool_call {
                let mut summary = format!(
                    "Step {}: called {}/{} -> {}",
                    step.step_index, tc.server_id, tc.tool_name, tc.result_summary
                );
                summary.truncate(300);
                summary
            } else {
                format!("Step {}: tool call", step.step_index)
            }
        }
        StepKind::Finish => format!(
            "Step {}: finished with answer {:?}",
            step.step_index,
            step.finish_answer.as_deref().unwrap_or("")
        ),
        StepKind::Unknown => format!("Step {}: unparseable response, skipped", step.step_index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolCallRecord;

    #[test]
    fn system_prompt_lists_tools() {
        let tools = vec![ToolInfo {
            server_id: "k8s".into(),
            name: "get_pods".into(),
            description: "list pods".into(),
            input_schema: serde_json::Value::Null,
        }];
        let prompt = build_system_prompt("You are an SRE agent.", &tools);
        assert!(prompt.contains("k8s/get_pods: list pods"));
        assert!(prompt.contains(STRUCTURAL_INSTRUCTION));
    }

    #[test]
    fn user_prompt_wraps_goal_in_delimiters() {
        let prompt = build_user_prompt("investigate latency", &[]);
        assert!(prompt.contains(USER_GOAL_START));
        assert!(prompt.contains(USER_GOAL_END));
        assert!(prompt.contains("investigate latency"));
    }

    #[test]
    fn user_prompt_caps_history_to_last_ten() {
        let steps: Vec<StepRecord> = (0..15)
            .map(|i| StepRecord {
                step_index: i,
                kind: StepKind::ToolCall,
                tool_call: Some(ToolCallRecord {
                    server_id: "s".into(),
                    tool_name: "t".into(),
                    arguments: serde_json::Value::Null,
                    result_summary: format!("result {i}"),
                    is_error: false,
                }),
                finish_answer: None,
                raw_response: None,
            })
            .collect();
        let prompt = build_user_prompt("goal", &steps);
        assert!(!prompt.contains("Step 0:"));
        assert!(prompt.contains("Step 14:"));
    }
}
