//! External command execution

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::errors::CollaboratorError;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Both streams, for pattern matching on tool diagnostics
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Short description of a failed run
    pub fn describe(&self, program: &Path) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.code {
            Some(code) => format!("{} exited with {}: {}", program.display(), code, detail),
            None => format!("{} killed by signal: {}", program.display(), detail),
        }
    }
}

/// Run `program` with `args` and capture its output.
///
/// A missing binary is a permanent failure; other spawn errors are transient.
pub async fn run(program: &Path, args: &[&str]) -> Result<CommandOutput, CollaboratorError> {
    debug!("Running {} {}", program.display(), args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                CollaboratorError::Rejected(format!("cannot run {}: {}", program.display(), e))
            }
            _ => CollaboratorError::Transient(format!("cannot run {}: {}", program.display(), e)),
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
