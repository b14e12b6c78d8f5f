//! Shell execution for runtime CLI invocations

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Directories searched ahead of the inherited PATH
pub const PATH_PREFIX: &str = "/usr/local/bin:/opt/homebrew/bin:/usr/bin";

/// PATH used when the environment does not provide one
pub const FALLBACK_PATH: &str = "/usr/local/bin:/opt/homebrew/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Captured result of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout as text, or `None` if it is not valid UTF-8
    pub fn stdout_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.stdout).ok()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs one command line to completion.
///
/// Implementations block the calling task until the child exits. A process
/// that ran and exited non-zero is an `Ok` value; only a failure to run the
/// process at all is an `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command_line: &str) -> Result<CommandOutput, ExecError>;
}

/// Executes command lines through `sh -c` with the augmented PATH
pub struct ShellExecutor {
    shell: PathBuf,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command_line: &str) -> Result<CommandOutput, ExecError> {
        tracing::trace!(command = command_line, "spawning");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command_line)
            .env("PATH", augmented_path(std::env::var_os("PATH")))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                command: command_line.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Prefix the inherited PATH with the standard tool directories
pub fn augmented_path(inherited: Option<OsString>) -> OsString {
    match inherited {
        Some(existing) if !existing.is_empty() => {
            let mut path = OsString::from(PATH_PREFIX);
            path.push(":");
            path.push(existing);
            path
        }
        _ => OsString::from(FALLBACK_PATH),
    }
}

#[cfg(test)]
impl ShellExecutor {
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[cfg(test)]
impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stdout: Vec::new(),
            stderr: b"command failed".to_vec(),
        }
    }
}
