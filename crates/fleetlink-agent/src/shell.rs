//! Shell command execution.
//!
//! Commands arrive as a single string and run under `/bin/bash -c`, the
//! same way an operator would type them. Stdout and stderr are captured
//! and returned together so the Center sees what a terminal would show.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("command exited with status {status}: {output}")]
    Failed { status: i32, output: String },
}

/// Runs a command string and returns its combined output.
///
/// Implemented by [`ShellExecutor`] in production; tests substitute a
/// canned executor to exercise dispatch without touching a real shell.
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    async fn execute(&self, command: &str) -> Result<String, ExecError>;
}

/// Executes commands via `/bin/bash -c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecutor;

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> Result<String, ExecError> {
        let out = Command::new("/bin/bash")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ExecError::Spawn)?;

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));

        if out.status.success() {
            Ok(combined)
        } else {
            Err(ExecError::Failed {
                status: out.status.code().unwrap_or(-1),
                output: combined,
            })
        }
    }
}
