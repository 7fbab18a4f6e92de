//! Parses the planner LLM's raw text response into a dispatchable action.
//!
//! Grounded in the original planner's `_parse_planner_response`: extract the
//! first JSON object from free-form text using a brace-balance-tolerant
//! regex, then classify it by shape. A response is a `tool_call` when it has
//! `tool_name`/`server_id`/`arguments`, a `finish` when it has `answer`;
//! anything else — including text with no embedded JSON object at all —
//! becomes `Unknown`, carrying the raw text forward for audit.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Matches a JSON object that may itself contain one level of nested
/// braces — enough for the flat tool-call/finish shapes the planner
/// produces without requiring a full JSON parser pass over the whole
/// response.
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall {
        server_id: String,
        tool_name: String,
        arguments: Value,
    },
    Finish {
        answer: String,
    },
    Unknown {
        raw: String,
    },
}

pub fn parse_planner_response(raw: &str) -> Action {
    let Some(m) = JSON_OBJECT.find(raw) else {
        return parse_bare_finish(raw);
    };

    let Ok(value) = serde_json::from_str::<Value>(m.as_str()) else {
        return parse_bare_finish(raw);
    };

    if let Some(answer) = value.get("answer").and_then(Value::as_str) {
        return Action::Finish {
            answer: answer.to_string(),
        };
    }

    let tool_name = value.get("tool_name").and_then(Value::as_str);
    let server_id = value.get("server_id").and_then(Value::as_str);
    if let (Some(tool_name), Some(server_id)) = (tool_name, server_id) {
        return Action::ToolCall {
            server_id: server_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: value.get("arguments").cloned().unwrap_or(Value::Object(Default::default())),
        };
    }

    parse_bare_finish(raw)
}

/// Fallback for a response with no usable embedded JSON: if the
/// case-insensitive token `FINISH` appears, everything after it is the
/// answer (spec §4.4.5/§8.4). Otherwise the whole response is `Unknown`.
fn parse_bare_finish(raw: &str) -> Action {
    if let Some(idx) = raw.to_ascii_uppercase().find("FINISH") {
        let answer = raw[idx + "FINISH".len()..].trim();
        if !answer.is_empty() {
            return Action::Finish {
                answer: answer.to_string(),
            };
        }
    }
    Action::Unknown { raw: raw.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_call() {
        let raw = r#"Let me check that. {"server_id": "k8s", "tool_name": "get_pods", "arguments": {"namespace": "default"}}"#;
        let action = parse_planner_response(raw);
        assert_eq!(
            action,
            Action::ToolCall {
                server_id: "k8s".into(),
                tool_name: "get_pods".into(),
                arguments: serde_json::json!({"namespace": "default"}),
            }
        );
    }

    #[test]
    fn parses_finish() {
        let raw = r#"{"answer": "The pods are healthy."}"#;
        assert_eq!(
            parse_planner_response(raw),
            Action::Finish {
                answer: "The pods are healthy.".into()
            }
        );
    }

    #[test]
    fn falls_back_to_unknown_with_no_json() {
        let raw = "I'm not sure what to do next.";
        assert_eq!(
            parse_planner_response(raw),
            Action::Unknown { raw: raw.to_string() }
        );
    }

    #[test]
    fn bare_finish_token_without_json_is_treated_as_finish() {
        let raw = "FINISH 8.8.8.8 is reachable with 0% packet loss.";
        assert_eq!(
            parse_planner_response(raw),
            Action::Finish {
                answer: "8.8.8.8 is reachable with 0% packet loss.".into()
            }
        );
    }

    #[test]
    fn bare_finish_token_is_case_insensitive() {
        let raw = "finish: all checks passed";
        assert_eq!(
            parse_planner_response(raw),
            Action::Finish {
                answer: ": all checks passed".into()
            }
        );
    }

    #[test]
    fn falls_back_to_unknown_on_malformed_json() {
        let raw = r#"{"tool_name": "get_pods", "server_id":}"#;
        assert!(matches!(parse_planner_response(raw), Action::Unknown { .. }));
    }

    #[test]
    fn tool_call_defaults_missing_arguments_to_empty_object() {
        let raw = r#"{"server_id": "k8s", "tool_name": "list_nodes"}"#;
        assert_eq!(
            parse_planner_response(raw),
            Action::ToolCall {
                server_id: "k8s".into(),
                tool_name: "list_nodes".into(),
                arguments: serde_json::json!({}),
            }
        );
    }
}
