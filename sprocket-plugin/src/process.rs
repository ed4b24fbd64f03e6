//! Subprocess execution shared by the git and cargo collaborators

use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};

/// Run a command to completion.
///
/// The child is killed when the timeout elapses or `cancel` fires. A non-zero
/// exit status is not an error here; see [`run_checked`].
pub(crate) async fn run(
    mut cmd: Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ToolResult<Output> {
    let program = program_name(&cmd);

    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(
        target: "process",
        command = %describe(&cmd),
        "Running command"
    );

    let child = cmd.spawn()?;

    // Dropping the wait future drops the child, which kills it
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => Ok(output?),
            Err(_) => Err(ToolError::Timeout { program, timeout }),
        },
    }
}

/// Run a command and fail with its stderr when it exits unsuccessfully
pub(crate) async fn run_checked(
    cmd: Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ToolResult<Output> {
    let program = program_name(&cmd);
    let args = arguments(&cmd);
    let output = run(cmd, timeout, cancel).await?;

    if !output.status.success() {
        return Err(ToolError::CommandFailed {
            program,
            args,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

fn arguments(cmd: &Command) -> String {
    cmd.as_std()
        .get_args()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe(cmd: &Command) -> String {
    format!("{} {}", program_name(cmd), arguments(cmd))
}
