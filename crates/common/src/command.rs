//! Command execution
//!
//! External commands reach a host (or a forwarder's control channel) through
//! a [`CommandExecutor`]. The shell implementation spawns a subprocess with
//! `tokio::process` so that waiting on it yields instead of blocking.

use crate::{Error, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Only populated when output capture was requested
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl CommandOutput {
    /// Build an output from a transport result.
    ///
    /// A missing exit code means the transport broke its contract and is
    /// reported as an integration error, never as a command failure.
    pub fn from_parts(
        exit_code: Option<i32>,
        stdout: Option<String>,
        stderr: Option<String>,
    ) -> Result<Self> {
        let exit_code = exit_code.ok_or_else(|| {
            Error::Integration("command transport returned no exit code".to_string())
        })?;
        Ok(Self {
            exit_code,
            stdout,
            stderr,
        })
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> &str {
        self.stdout.as_deref().unwrap_or("")
    }

    pub fn stderr_str(&self) -> &str {
        self.stderr.as_deref().unwrap_or("")
    }

    /// Turn a non-zero exit into [`Error::CommandExecution`]
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandExecution {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr_str().trim().to_string(),
            })
        }
    }
}

/// Something that runs textual commands on a host or control channel
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Run `command`; `capture` requests stdout/stderr in the result
    async fn execute(&self, command: &str, capture: bool) -> Result<CommandOutput>;
}

/// Runs commands through a local shell (`sh -c`)
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    label: String,
    program: String,
}

impl ShellExecutor {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("localhost", "/bin/sh")
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    fn name(&self) -> &str {
        &self.label
    }

    async fn execute(&self, command: &str, capture: bool) -> Result<CommandOutput> {
        debug!("[{}] {}", self.label, command.trim());

        let output = Command::new(&self.program)
            .arg("-c")
            .arg(command)
            .output()
            .await?;

        trace!("[{}] exit status {:?}", self.label, output.status.code());

        let (stdout, stderr) = if capture {
            (
                Some(String::from_utf8_lossy(&output.stdout).to_string()),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            )
        } else {
            (None, None)
        };

        CommandOutput::from_parts(output.status.code(), stdout, stderr)
    }
}
