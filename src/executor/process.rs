//! External-process executor.
//!
//! Invokes a binary with a single argument derived from the task payload and
//! waits for it to exit. Stdout becomes the outcome's output; the exit
//! status becomes its code.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::model::{FailureKind, Outcome, Task};

use super::Executor;

/// How the single command-line argument is derived from the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSource {
    /// One field of the payload object, with an optional fallback.
    Field {
        name: String,
        default: Option<serde_json::Value>,
    },
    /// The whole payload, as JSON text.
    Payload,
}

impl ArgSource {
    /// Render the argument. Strings pass through verbatim, numbers and
    /// booleans as their text, anything else as JSON.
    pub fn render(&self, payload: &serde_json::Value) -> Result<String, String> {
        match self {
            ArgSource::Payload => Ok(payload.to_string()),
            ArgSource::Field { name, default } => {
                let value = payload
                    .get(name)
                    .filter(|v| !v.is_null())
                    .or(default.as_ref())
                    .ok_or_else(|| format!("payload field `{name}` is missing"))?;
                Ok(match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
        }
    }
}

/// Runs a task by spawning an external binary.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: PathBuf,
    arg: ArgSource,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<PathBuf>, arg: ArgSource) -> Self {
        Self {
            command: command.into(),
            arg,
        }
    }

    /// Resolve relative command paths against the process working directory.
    fn resolve_command(&self) -> std::io::Result<PathBuf> {
        if self.command.is_relative() {
            Ok(std::env::current_dir()?.join(&self.command))
        } else {
            Ok(self.command.clone())
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, task: &Task) -> Outcome {
        let start = Instant::now();
        let elapsed_ms = || start.elapsed().as_millis() as u64;

        let arg = match self.arg.render(&task.payload) {
            Ok(arg) => arg,
            Err(msg) => return Outcome::failed(FailureKind::InvalidPayload, msg, elapsed_ms()),
        };

        let command = match self.resolve_command() {
            Ok(command) => command,
            Err(e) => {
                return Outcome::failed(
                    FailureKind::SpawnFailed,
                    format!("cannot resolve {}: {e}", self.command.display()),
                    elapsed_ms(),
                );
            }
        };
        if !command.exists() {
            return Outcome::failed(
                FailureKind::BackendMissing,
                format!("executor not found: {}", command.display()),
                elapsed_ms(),
            );
        }

        debug!(
            task_id = %task.id,
            command = %command.display(),
            %arg,
            "running executor"
        );

        let output = Command::new(&command)
            .arg(&arg)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(
                        task_id = %task.id,
                        status = %output.status,
                        stderr = %stderr.trim(),
                        "executor exited unsuccessfully"
                    );
                }
                match output.status.code() {
                    Some(code) => Outcome {
                        code,
                        output: stdout,
                        duration_ms: elapsed_ms(),
                        failure: None,
                    },
                    None => Outcome {
                        code: -1,
                        output: stdout,
                        duration_ms: elapsed_ms(),
                        failure: Some(FailureKind::Terminated),
                    },
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Outcome::failed(
                FailureKind::BackendMissing,
                format!("executor not found: {}: {e}", command.display()),
                elapsed_ms(),
            ),
            Err(e) => Outcome::failed(
                FailureKind::SpawnFailed,
                format!("failed to start {}: {e}", command.display()),
                elapsed_ms(),
            ),
        }
    }
}
