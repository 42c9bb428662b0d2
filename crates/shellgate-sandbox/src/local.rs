//! Local process sandbox provider.
//!
//! Runs commands through `sh -c` in an optional working directory. There is
//! no kernel-level isolation here; this provider exists for tests and
//! trusted single-host deployments where the OS user account is the
//! boundary. `pause` and `kill` are lifecycle no-ops because nothing
//! outlives an individual command.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::{RunOutput, SandboxError, SandboxHandle, SandboxProvider};

/// Maximum bytes of stdout/stderr kept per stream.
const DEFAULT_MAX_OUTPUT_BYTES: usize = 100_000;

/// Provider that executes commands as local child processes.
#[derive(Clone)]
pub struct LocalProcessProvider {
    workdir: Option<String>,
    max_output_bytes: usize,
}

impl Default for LocalProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProcessProvider {
    pub fn new() -> Self {
        Self {
            workdir: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Set the working directory commands run in.
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Cap the bytes retained per output stream.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

#[async_trait]
impl SandboxProvider for LocalProcessProvider {
    async fn create(
        &self,
        user_id: &str,
        _api_key: Option<&str>,
    ) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        let id = format!("local-{}", uuid::Uuid::new_v4());
        debug!(user_id = %user_id, sandbox_id = %id, "Created local process sandbox");

        Ok(Arc::new(LocalProcessSandbox {
            id,
            workdir: self.workdir.clone(),
            max_output_bytes: self.max_output_bytes,
        }))
    }
}

/// Handle for a local process sandbox.
pub struct LocalProcessSandbox {
    id: String,
    workdir: Option<String>,
    max_output_bytes: usize,
}

impl LocalProcessSandbox {
    fn truncate(&self, bytes: &[u8]) -> String {
        let kept = if bytes.len() > self.max_output_bytes {
            &bytes[..self.max_output_bytes]
        } else {
            bytes
        };
        let mut text = String::from_utf8_lossy(kept).to_string();
        if bytes.len() > self.max_output_bytes {
            text.push_str(&format!("\n[Output truncated, {} bytes total]", bytes.len()));
        }
        text
    }
}

#[async_trait]
impl SandboxHandle for LocalProcessSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, command: &str, run_timeout: Duration) -> Result<RunOutput, SandboxError> {
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = match timeout(run_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SandboxError::Io(e)),
            Err(_) => {
                return Err(SandboxError::Timeout {
                    timeout_secs: run_timeout.as_secs(),
                });
            }
        };

        Ok(RunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: self.truncate(&output.stdout),
            stderr: self.truncate(&output.stderr),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn pause(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}
