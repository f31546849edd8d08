//! Async subprocess executor.
//!
//! Spawns the real CLI with the credential envelope merged into its
//! environment, captures both output streams fully, and enforces the
//! configured `cli` timeout. The argument vector goes to process creation
//! verbatim; nothing is interpreted and nothing passes through a shell.

use keyhole_core::cli::CliResponse;
use keyhole_core::error::ProxyError;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// How long a SIGTERM'd child gets before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

pub struct Executor {
    cli_timeout: Duration,
}

impl Executor {
    pub fn new(cli_timeout: Duration) -> Self {
        Self { cli_timeout }
    }

    pub fn cli_timeout(&self) -> Duration {
        self.cli_timeout
    }

    /// Run `binary` with `args`, the parent environment, and the envelope
    /// overlay (overlay wins on collision). Subprocess exit codes are
    /// returned transparently; a spawn failure maps to the shell
    /// conventions (127 not found, 126 not executable) rather than a
    /// dispatch error.
    pub async fn run(
        &self,
        binary: &str,
        args: &[String],
        env_overlay: &HashMap<String, String>,
    ) -> Result<CliResponse, ProxyError> {
        let mut command = Command::new(binary);
        command
            .args(args)
            .envs(env_overlay)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reap the child even if the caller disconnects and this future
            // is dropped mid-flight.
            .kill_on_drop(true);

        tracing::debug!(binary, argc = args.len(), "spawning CLI");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CliResponse::failure(127, format!("{binary}: command not found")));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok(CliResponse::failure(126, format!("{binary}: permission denied")));
            }
            Err(e) => return Err(ProxyError::Internal(format!("spawn {binary}: {e}"))),
        };

        let mut stdout_pipe = child.stdout.take().expect("stdout is piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr is piped");

        // Drain both pipes while waiting, or a chatty child blocks on a
        // full pipe buffer and never exits.
        let wait_and_capture = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let (status, _, _) = tokio::join!(
                child.wait(),
                stdout_pipe.read_to_end(&mut stdout),
                stderr_pipe.read_to_end(&mut stderr),
            );
            (status, stdout, stderr)
        };

        let outcome = tokio::time::timeout(self.cli_timeout, wait_and_capture).await;
        match outcome {
            Ok((status, stdout, stderr)) => {
                let status = status
                    .map_err(|e| ProxyError::Internal(format!("wait for {binary}: {e}")))?;
                Ok(CliResponse {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            }
            Err(_elapsed) => {
                terminate(&mut child).await;
                Ok(CliResponse::failure(
                    -1,
                    format!("Command timed out after {}s", self.cli_timeout.as_secs()),
                ))
            }
        }
    }
}

/// Signal termination, give the child a short grace period, then kill.
/// `Child::wait` and `Child::kill` both reap, so no zombie survives this.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}
