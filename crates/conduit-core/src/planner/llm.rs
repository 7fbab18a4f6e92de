//! The planner's view of an LLM backend: a single async trait so tests and
//! alternate providers can swap in without touching the loop.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A chunk of streamed output, or the final accumulated text. The loop
/// persists each chunk as a `token` event as it arrives (see `loop_.rs`),
/// so a reconnecting SSE subscriber still observes tokens emitted before it
/// connected.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Completes `system_prompt` + `user_prompt`, optionally streaming
    /// chunks to `on_token` as they arrive. Returns the full response text.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        on_token: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String>;
}

/// A scripted `LlmProvider` for planner-loop tests: returns the next
/// response from a fixed script on each call, looping the last entry if the
/// script is exhausted. Grounded in the original test suite's mock LLM
/// fixture.
pub struct MockLlm {
    script: std::sync::Mutex<Vec<String>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockLlm {
    pub fn new(script: Vec<impl Into<String>>) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into_iter().map(Into::into).collect()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        on_token: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String> {
        let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        let response = script
            .get(idx)
            .or_else(|| script.last())
            .cloned()
            .unwrap_or_default();
        drop(script);

        if let Some(tx) = on_token {
            for word in response.split_inclusive(' ') {
                let _ = tx.send(word.to_string());
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_replays_script_then_repeats_last() {
        let llm = MockLlm::new(vec![r#"{"answer": "first"}"#, r#"{"answer": "second"}"#]);
        assert_eq!(llm.complete("sys", "usr", None).await.unwrap(), r#"{"answer": "first"}"#);
        assert_eq!(llm.complete("sys", "usr", None).await.unwrap(), r#"{"answer": "second"}"#);
        assert_eq!(llm.complete("sys", "usr", None).await.unwrap(), r#"{"answer": "second"}"#);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn mock_llm_streams_tokens_when_requested() {
        let llm = MockLlm::new(vec!["hello world"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        llm.complete("sys", "usr", Some(tx)).await.unwrap();
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.join(""), "hello world");
    }
}
