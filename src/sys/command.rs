// src/sys/command.rs

use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use crate::error::{InstallError, Result};

/// Runs `program args...` to completion and fails on a non-zero exit status.
pub async fn run_checked(program: &str, args: &[&str]) -> Result<Output> {
    run_command(Command::new(program).args(args), program).await
}

/// Same as [`run_checked`] for a caller-prepared command (env vars, cwd).
pub async fn run_command(cmd: &mut Command, program: &str) -> Result<Output> {
    debug!(program, "spawning external command");

    let output = cmd.output().await.map_err(|source| InstallError::CommandSpawn {
        program: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(InstallError::CommandFailed {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}
