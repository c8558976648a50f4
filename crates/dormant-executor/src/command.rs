//! Subprocess helper for executors that shell out.

use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecutorError, ExecutorResult};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv[0]` with the remaining arguments and capture its output.
///
/// A non-zero exit is not an error here; callers decide what it means.
/// Failing to spawn is.
pub async fn run(argv: &[String]) -> ExecutorResult<CommandOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| ExecutorError::Command {
        command: String::new(),
        reason: "empty command".to_string(),
    })?;

    debug!(command = %argv.join(" "), "running command");
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExecutorError::Command {
            command: argv.join(" "),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command and turn a non-zero exit into an error.
pub async fn run_checked(argv: &[String]) -> ExecutorResult<CommandOutput> {
    let output = run(argv).await?;
    if !output.success {
        return Err(ExecutorError::Command {
            command: argv.join(" "),
            reason: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}
