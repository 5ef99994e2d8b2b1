//! Process-execution seam for the connector utility.

use std::ffi::OsString;
use std::process::Command;

use uuid::Uuid;

use super::AttachError;

/// Captured result of one connector invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, when the process terminated normally.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// True when the process exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Runs connector commands; substitutable in tests.
pub trait CommandRunner {
    /// Executes `program` with `args`, capturing output.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::Failed`] when the process cannot be spawned.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        volume_id: Uuid,
    ) -> Result<CommandOutput, AttachError>;
}

/// Runner that spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        volume_id: Uuid,
    ) -> Result<CommandOutput, AttachError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| AttachError::Failed {
                volume_id,
                message: format!("failed to spawn {program}: {err}"),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
