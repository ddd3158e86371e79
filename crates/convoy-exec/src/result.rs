//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Turn a non-zero exit into `ExecError::CommandFailed`
    pub fn into_success(self) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::CommandFailed {
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}
