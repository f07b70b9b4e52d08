use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("'{program}' exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::Spawn { source, .. } if source.kind() == ErrorKind::NotFound)
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            CommandError::Spawn { source, .. } => source.kind() == ErrorKind::PermissionDenied,
            // fail2ban-client reports a socket permission error on stderr.
            CommandError::Failed { stderr, .. } => stderr.to_ascii_lowercase().contains("permission denied"),
            CommandError::Timeout { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Runs `program` with an explicit argument list and waits for it to finish.
///
/// No shell is involved. The child is killed if it outlives `timeout`, and a
/// non-zero exit status is reported as [`CommandError::Failed`].
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let mut command = TokioCommand::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, ?args, ?timeout, "Executing command.");
    let started = Instant::now();

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(CommandError::Spawn {
                program: program.to_string(),
                source,
            });
        }
        Err(_) => {
            warn!(program, ?timeout, "Command timed out, child killed.");
            return Err(CommandError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code();
    debug!(program, ?exit_code, elapsed_ms = started.elapsed().as_millis() as u64, "Command completed.");

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            code: exit_code,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}
