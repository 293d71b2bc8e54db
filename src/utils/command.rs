//! External tool invocation
//!
//! Every call is attempt-once: the tool runs to completion on the calling
//! thread and a non-zero exit is surfaced immediately as
//! [`AppError::ToolFailure`].

use std::ffi::OsStr;
use std::process::Command;
use tracing::debug;

use crate::error::{AppError, Result};

/// Captured output of a tool that exited successfully
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
}

/// Run `command` (program followed by fixed leading arguments) with `args`
/// appended, blocking until it exits.
pub fn run_tool<I, S>(command: &[String], args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (program, leading) = command
        .split_first()
        .ok_or_else(|| AppError::Config("empty tool command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(leading).args(args);
    debug!("Running {:?}", cmd);

    let output = cmd
        .output()
        .map_err(|e| AppError::tool(program.as_str(), format!("cannot start: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let diagnostic = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(AppError::tool(
            program.as_str(),
            format!("exit code {}: {}", code, diagnostic),
        ));
    }

    Ok(ToolOutput { stdout })
}
