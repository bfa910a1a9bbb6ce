//! Error types for the launcher.
//!
//! Only conditions that stop a pipeline are errors. A collaborator that runs
//! and exits non-zero is reported through the stage result types instead, so
//! its exit code can be propagated unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while orchestrating a build/test run.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Host or CI runner OS has no toolchain table entry
    #[error("Unsupported OS: {0}")]
    UnsupportedOs(String),

    /// Repository-level command run outside a git checkout
    #[error("{command} requires being in a git repository")]
    NotInGitRepository { command: String },

    /// A required tool could not be found on PATH
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    /// Child process could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// `<build>/executables-out` does not exist
    #[error("Binary directory not found: {0}")]
    OutputDirMissing(PathBuf),

    /// Neither `<name>` nor `<name>.exe` exists in the output directory
    #[error("Binary not found: {name} (searched {dir})")]
    ArtifactMissing { name: String, dir: PathBuf },

    /// Subtree a sandbox should be copied from does not exist
    #[error("Sandbox source not found: {0}")]
    SandboxSourceMissing(PathBuf),

    /// Launcher executable for a sandbox delegation is gone
    #[error("Launcher executable not found: {0}")]
    LauncherMissing(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl LaunchError {
    /// Process exit code the dispatcher reports for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LaunchError>;
