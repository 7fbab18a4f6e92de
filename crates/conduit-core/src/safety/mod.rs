//! Prompt-injection mitigation for user-supplied goal text and tool output.

pub mod prompt_injection;
