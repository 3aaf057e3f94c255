//! Child-process stdio backend
//!
//! Prompts can exceed the OS pipe buffer, so stdin is fed from its own task
//! while stdout/stderr are drained concurrently; the child is never left
//! blocked on a full pipe.

use crate::backend::{BackendError, LlmBackend};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const TERM_GRACE: Duration = Duration::from_secs(5);

/// Runs a configured command line per request: prompt on stdin, markdown (or
/// JSON) on stdout. Success requires exit status zero and non-empty output.
/// There is no wall-clock timeout; cancellation is the only way to stop a
/// stuck command.
pub struct SubprocessBackend {
    command_line: String,
    workdir: Option<PathBuf>,
}

impl SubprocessBackend {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn spawn(&self) -> Result<Child, BackendError> {
        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(&self.command_line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command.spawn().map_err(|e| BackendError::Spawn(e.to_string()))
    }
}

#[async_trait::async_trait]
impl LlmBackend for SubprocessBackend {
    fn label(&self) -> String {
        "subprocess".to_string()
    }

    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        debug!(bytes = prompt.len(), "spawning agent command");
        let mut child = self.spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Feed stdin from its own task; write errors just mean the child
        // stopped reading, which the exit status will explain.
        let prompt_bytes = prompt.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&prompt_bytes).await;
                let _ = stdin.shutdown().await;
            }
        });

        let outcome = tokio::select! {
            result = drive(&mut child, stdout, stderr) => result,
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                writer.abort();
                return Err(BackendError::Cancelled);
            }
        };
        let _ = writer.await;

        let (status, output, errors) = outcome?;
        if !status.success() {
            return Err(BackendError::Process {
                code: status.code(),
                stderr: errors.trim().to_string(),
            });
        }
        if output.trim().is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(output)
    }
}

/// Drain both pipes, then reap the child.
async fn drive(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> Result<(std::process::ExitStatus, String, String), BackendError> {
    let (output, errors) = tokio::join!(read_pipe(stdout), read_pipe(stderr));
    let status = child
        .wait()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    Ok((status, output, errors))
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    match pipe {
        Some(mut pipe) => {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        }
        None => String::new(),
    }
}

/// Ask the child to stop, then force it after a grace period.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        match tokio::time::timeout(TERM_GRACE, child.wait()).await {
            Ok(_) => return,
            Err(_) => warn!(pid, "agent command ignored SIGTERM, killing"),
        }
    }
    let _ = child.kill().await;
}
