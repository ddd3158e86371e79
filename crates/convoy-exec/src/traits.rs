//! Command runner trait

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Runs a program with arguments and captures its output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandResult, ExecError>;
}
