//! Subprocess transport to the agent backend.
//!
//! Grounded on `mcp-client::transport::StdioTransport`: spawn a child over
//! piped stdio, write newline-delimited JSON to stdin, read newline-
//! delimited JSON from stdout, skip non-JSON lines (the agent backend may
//! interleave logging on stdout) up to a bound before declaring it broken.
//! Unlike the MCP transport this is not request/response — one prompt is
//! written, then the backend streams [`AgentEvent`]s until `done` or
//! `error`. It isn't purely one-shot either: the permission round-trip
//! (spec.md §4.1, §4.4) needs a write back into a running turn, so stdin
//! is kept open rather than shut down after the prompt, and
//! `send_permission_response` writes one reply line when a
//! `PermissionRequest` event arrives.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use rl_domain::error::{Error, Result};

use crate::config::AgentBackendConfig;
use crate::event::AgentEvent;

/// Lines that don't parse as an `AgentEvent` are skipped (logging leaking
/// onto stdout); give up after this many in a row.
const MAX_SKIP_LINES: usize = 1000;

/// Reply to a `PermissionRequest` event, written back to the backend's
/// stdin as a single JSON line (spec.md §4.1/§4.4).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionReply {
    Allow {
        request_id: String,
        tool_input: serde_json::Value,
    },
    Deny {
        request_id: String,
        message: String,
    },
}

/// One subprocess invocation of the agent backend: a single prompt in,
/// a stream of [`AgentEvent`]s out, with permission replies written back
/// in as the broker resolves them.
pub struct AgentProcess {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    alive: AtomicBool,
}

impl AgentProcess {
    /// Spawn the backend in `working_dir` and write `prompt` to its stdin.
    /// When `resume_session_id` is set and the config names a
    /// `resume_arg`, the backend is asked to attach to that prior session
    /// instead of starting fresh.
    pub async fn spawn(
        config: &AgentBackendConfig,
        working_dir: &Path,
        prompt: &str,
        resume_session_id: Option<&str>,
    ) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        if let (Some(flag), Some(session_id)) = (&config.resume_arg, resume_session_id) {
            cmd.arg(flag).arg(session_id);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn agent backend: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("failed to capture agent backend stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("failed to capture agent backend stdout".into()))?;

        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(Error::Io)?;
        stdin.write_all(b"\n").await.map_err(Error::Io)?;
        stdin.flush().await.map_err(Error::Io)?;
        // Stdin stays open (not shut down) so `send_permission_response`
        // can write back into the same turn.

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            alive: AtomicBool::new(true),
        })
    }

    /// Answer a `PermissionRequest` event by writing one JSON line to the
    /// backend's stdin. Called by the broker once the Permission Arbiter
    /// (C4) resolves the request, whether by explicit response, timeout,
    /// or connection close (spec.md §4.4).
    pub async fn send_permission_response(
        &self,
        request_id: &str,
        allowed: bool,
        tool_input: Option<serde_json::Value>,
        message: Option<String>,
    ) -> Result<()> {
        let reply = if allowed {
            PermissionReply::Allow {
                request_id: request_id.to_string(),
                tool_input: tool_input.unwrap_or(serde_json::Value::Null),
            }
        } else {
            PermissionReply::Deny {
                request_id: request_id.to_string(),
                message: message.unwrap_or_else(|| "Permission denied".into()),
            }
        };
        let line = serde_json::to_string(&reply)
            .map_err(|e| Error::Transport(format!("failed to encode permission reply: {e}")))?;
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(Error::Io)?;
        stdin.write_all(b"\n").await.map_err(Error::Io)?;
        stdin.flush().await.map_err(Error::Io)
    }

    /// Read the next event, or `None` once the stream has ended cleanly
    /// (the caller should already have seen a `done`/`error` event by
    /// then; `None` covers the case of a backend that exits silently).
    pub async fn next_event(&self) -> Result<Option<AgentEvent>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout
                .read_line(&mut line)
                .await
                .map_err(Error::Io)?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(trimmed) {
                Ok(event) => {
                    if event.is_terminal() {
                        self.alive.store(false, Ordering::SeqCst);
                    }
                    return Ok(Some(event));
                }
                Err(_) => {
                    skipped += 1;
                    if skipped >= MAX_SKIP_LINES {
                        self.alive.store(false, Ordering::SeqCst);
                        return Err(Error::Transport(
                            "agent backend produced too many non-event lines on stdout".into(),
                        ));
                    }
                    tracing::debug!(line = %trimmed, "skipping non-event line from agent backend stdout");
                }
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Cancellation: kill the child process. The agent backend has no
    /// graceful interrupt signal in this contract, so the broker treats a
    /// killed process the same as an unexpected exit and emits `cancelled`
    /// itself rather than waiting on a `done` that will never arrive.
    pub async fn interrupt(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        child.start_kill().map_err(Error::Io)
    }

    pub async fn wait(&self) -> Result<std::process::ExitStatus> {
        let mut child = self.child.lock().await;
        child.wait().await.map_err(Error::Io)
    }
}
