//! Subprocess execution seam.
//!
//! Every external tool (cmake, ninja/make, clang-format, run-clang-tidy,
//! git, the compiled simulator, a nested launcher) is started through a
//! [`CommandExecutor`]. Calls block the pipeline until the child exits;
//! there is no timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{LaunchError, Result};

/// How the child's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Child writes straight to the launcher's terminal; nothing is captured.
    Inherit,
    /// Stdout and stderr are captured into the returned [`CommandOutput`].
    Capture,
}

/// A fully described child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,

    /// Working directory (inherits the launcher's when `None`).
    pub cwd: Option<PathBuf>,

    /// Extra environment variables layered over the launcher's environment.
    pub env: Vec<(String, String)>,

    /// Output handling.
    pub output: OutputMode,
}

impl Invocation {
    /// Create a captured invocation of `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            output: OutputMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Let the child write to the terminal instead of capturing its output.
    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Command line as a single string, for log messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Whether `arg` appears verbatim in the argument list.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success, -1 = killed by a signal).
    pub exit_code: i32,

    /// Captured stdout (empty for inherited output).
    pub stdout: String,

    /// Captured stderr (empty for inherited output).
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, silent result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A result with only an exit code.
    pub fn with_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Runs child processes for the pipeline.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `invocation` to completion.
    ///
    /// Returns `Err` only when the process could not be started; a non-zero
    /// exit is a normal `Ok` result.
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Executor backed by real operating-system processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation.display(), "Spawning");

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let spawn_err = |source| LaunchError::Spawn {
            program: invocation.program.clone(),
            source,
        };

        match invocation.output {
            OutputMode::Inherit => {
                let status = command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .await
                    .map_err(spawn_err)?;
                Ok(CommandOutput::with_code(status.code().unwrap_or(-1)))
            }
            OutputMode::Capture => {
                let child = command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(spawn_err)?;
                let output = child.wait_with_output().await?;

                Ok(CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                })
            }
        }
    }
}
