//! Planner Loop: the per-run state machine that turns a goal into a
//! sequence of LLM-directed tool calls and, eventually, an answer.

mod action;
mod executor;
mod llm;
mod llm_http;
mod loop_;
mod prompt;

pub use action::{parse_planner_response, Action};
pub use llm::{LlmProvider, MockLlm};
pub use llm_http::HttpLlmProvider;
pub use loop_::{
    execute_approved_tool_and_update_run, reject_pending_tool_call, resume_planner_loop,
    run_planner_loop, PlannerServices, PlannerSettings, MAX_PLANNER_STEPS,
};
