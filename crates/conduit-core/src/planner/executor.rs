//! Executes a single approved tool call and turns the outcome into a
//! `StepRecord`/`ToolCallRecord` pair, sanitizing the returned text through
//! the prompt-injection filter before it re-enters the conversation.

use std::time::Duration;

use serde_json::Value;

use crate::model::ToolCallRecord;
use crate::safety::prompt_injection::apply_prompt_injection_filter;
use crate::toolserver::ToolServerManager;

const RESULT_SUMMARY_CAP: usize = 2000;

pub async fn execute_tool_call(
    manager: &ToolServerManager,
    server_id: &str,
    tool_name: &str,
    arguments: Value,
    timeout: Duration,
    prompt_injection_filter_enabled: bool,
) -> ToolCallRecord {
    let outcome = manager
        .call_tool(server_id, tool_name, arguments.clone(), timeout)
        .await;

    let mut text = outcome.text();
    if text.is_empty() && outcome.is_error {
        text = "tool call failed with no message".to_string();
    }
    let sanitized = apply_prompt_injection_filter(&text, prompt_injection_filter_enabled);
    let mut result_summary = sanitized;
    result_summary.truncate(RESULT_SUMMARY_CAP);

    ToolCallRecord {
        server_id: server_id.to_string(),
        tool_name: tool_name.to_string(),
        arguments,
        result_summary,
        is_error: outcome.is_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_yields_error_record() {
        let manager = ToolServerManager::new();
        let record = execute_tool_call(
            &manager,
            "nonexistent",
            "whatever",
            serde_json::json!({}),
            Duration::from_secs(1),
            true,
        )
        .await;
        assert!(record.is_error);
        assert!(record.result_summary.contains("unknown or disconnected"));
    }

    #[tokio::test]
    async fn sanitizes_injected_content_in_result() {
        let manager = ToolServerManager::new();
        // Forces the unknown-server error path, whose message is itself
        // benign, but exercises the same sanitization call path a live
        // tool server's adversarial output would go through.
        let record = execute_tool_call(
            &manager,
            "nonexistent",
            "whatever",
            serde_json::json!({}),
            Duration::from_secs(1),
            true,
        )
        .await;
        assert!(!record.result_summary.to_lowercase().contains("ignore previous instructions"));
    }
}
