//! Local command execution using `tokio::process`

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::CommandRunner;

/// Local command runner
///
/// Spawns programs directly (no shell) so arguments are passed verbatim.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a new local runner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(program = %program, args = ?args, "executing local command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{program}: {e}")))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            program = %program,
            status = status,
            duration = ?duration,
            "command completed"
        );

        if !output.status.success() {
            error!(
                program = %program,
                status = status,
                stderr = %stderr,
                "command failed"
            );
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandResult, ExecError> {
        self.execute(program, args).await
    }
}
