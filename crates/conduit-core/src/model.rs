//! Run, event, and step types — the entities in the data model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A run's lifecycle state. Terminal states are `Completed`, `Failed`,
/// `Cancelled`; `AwaitingApproval` is a transient pause reachable only from
/// `Running` and returning only to `Running` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "awaiting_approval" => RunStatus::AwaitingApproval,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            _ => return None,
        })
    }
}

/// A proposed or executed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub server_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result_summary: String,
    pub is_error: bool,
}

/// The subject of an HITL review: a tool call proposed by the planner but
/// not yet executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub server_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub step_index: u32,
}

/// One iteration of the planner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    Finish,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: u32,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// Durable record of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub goal: String,
    pub agent_profile_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Whether this run's planner steps should stream `token` events as the
    /// LLM responds, set once at creation (spec §6.1/§9).
    #[serde(default)]
    pub stream_tokens: bool,
    pub pending_tool_call: Option<PendingToolCall>,
    pub checkpoint_step_index: Option<u32>,
    pub answer: Option<String>,
    pub error: Option<String>,
    /// Correlation id of the HTTP request that created this run, for log
    /// tracing only — never used as an authorization signal.
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An append-only event-log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: i64,
    pub run_id: String,
    pub event_type: String,
    pub payload: Value,
}

/// Fields that may be patched via `RunStore::update_run`. `None` means
/// "leave unchanged"; `clear_pending_tool_call` is a distinguished
/// sentinel since `pending_tool_call: None` is itself a meaningful value.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub error: Option<String>,
    pub answer: Option<String>,
    pub steps: Option<Vec<StepRecord>>,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pending_tool_call: Option<PendingToolCall>,
    pub clear_pending_tool_call: bool,
    pub checkpoint_step_index: Option<u32>,
}

impl RunPatch {
    pub fn status(mut self, s: RunStatus) -> Self {
        self.status = Some(s);
        self
    }
    pub fn error(mut self, e: impl Into<String>) -> Self {
        self.error = Some(e.into());
        self
    }
    pub fn answer(mut self, a: impl Into<String>) -> Self {
        self.answer = Some(a.into());
        self
    }
    pub fn steps(mut self, s: Vec<StepRecord>) -> Self {
        self.steps = Some(s);
        self
    }
    pub fn tool_calls(mut self, t: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = Some(t);
        self
    }
    pub fn completed_now(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }
    pub fn pending_tool_call(mut self, p: PendingToolCall) -> Self {
        self.pending_tool_call = Some(p);
        self
    }
    pub fn clear_pending_tool_call(mut self) -> Self {
        self.clear_pending_tool_call = true;
        self
    }
    pub fn checkpoint_step_index(mut self, i: u32) -> Self {
        self.checkpoint_step_index = Some(i);
        self
    }
}

/// Tool descriptor discovered at tool-server connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of a tool call, normalized from the provider's framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    /// Binary/image content passes through but is never surfaced to the
    /// model — the planner only reads `Text` variants.
    Other { value: Value },
}

impl ToolCallOutcome {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Other { .. } => None,
            })
            .collect()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}
