//! Newline-delimited JSON stdio transport to a tool-server subprocess.
//!
//! Grounded verbatim in shape on the teacher's `mcp::transport::StdioTransport`:
//! a spawned child process, a mutex-guarded stdin/stdout pair, line-oriented
//! framing, and env-value masking for anything that looks like a secret
//! when logging the spawn command.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};

pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

fn masked_env_display(env: &std::collections::HashMap<String, String>) -> Vec<(String, String)> {
    env.iter()
        .map(|(k, v)| {
            let upper = k.to_uppercase();
            if upper.ends_with("_API_KEY") || upper.ends_with("_TOKEN") || upper.contains("SECRET") {
                (k.clone(), "***".to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<Self> {
        tracing::info!(
            command,
            ?args,
            env = ?masked_env_display(env),
            "spawning tool server"
        );

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Transport(format!("spawning {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Transport("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Transport("child has no stdout".into()))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }

    pub async fn send(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::Transport(format!("writing to tool server: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| EngineError::Transport(format!("writing to tool server: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| EngineError::Transport(format!("flushing tool server stdin: {e}")))
    }

    /// Reads the next JSON-object line, skipping blank lines and anything
    /// that doesn't look like a JSON object (tool-server stderr-on-stdout
    /// noise). Returns `Ok(None)` on EOF.
    pub async fn receive(&self) -> Result<Option<String>> {
        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| EngineError::Transport(format!("reading from tool server: {e}")))?;
            if n == 0 {
                if !self.is_alive().await {
                    return Ok(None);
                }
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('{') {
                tracing::debug!(line = trimmed, "ignoring non-JSON line from tool server");
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}
