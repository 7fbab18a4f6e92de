//! An `LlmProvider` backed by an OpenAI-compatible chat completions HTTP
//! endpoint, streamed over Server-Sent Events.
//!
//! Grounded in the teacher's use of `reqwest` for its own AI provider calls
//! in `agent::orchestrator` (request building, streaming response
//! consumption) — generalized here to the planner's single-turn
//! system/user prompt shape instead of multi-turn chat history.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};

use super::llm::LlmProvider;

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct Chunk {
    choices: Vec<ChunkChoice>,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        on_token: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "stream": true,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt},
                ],
            }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| EngineError::Llm(format!("LLM request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Llm(format!(
                "LLM endpoint returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut full = String::new();
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::Llm(format!("reading LLM stream: {e}")))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_string();
                buf.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<Chunk>(data) else {
                    continue;
                };
                if let Some(text) = parsed.choices.first().and_then(|c| c.delta.content.clone()) {
                    full.push_str(&text);
                    if let Some(tx) = &on_token {
                        let _ = tx.send(text);
                    }
                }
            }
        }

        Ok(full)
    }
}
