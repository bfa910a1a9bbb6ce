//! Running the compiled artifact.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LaunchError, Result};
use crate::executor::{CommandExecutor, Invocation};

/// Subdirectory of the build directory holding linked executables.
pub const OUTPUT_DIR: &str = "executables-out";

/// Suffix Windows toolchains give linked executables.
pub const WINDOWS_EXE_SUFFIX: &str = ".exe";

/// Directory (relative to the project root) the simulator writes logs to.
pub const LOG_DIR: &str = "log/log_data";

/// Captured run of the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Binary that was run.
    pub binary: PathBuf,

    pub stdout: String,

    pub stderr: String,

    /// Artifact's own exit code, passed through unmodified.
    pub exit_code: i32,
}

/// Find `name` (or `name` plus [`WINDOWS_EXE_SUFFIX`]) under `<build_dir>/executables-out`.
pub fn locate_artifact(build_dir: &Path, name: &str) -> Result<PathBuf> {
    let bin_dir = build_dir.join(OUTPUT_DIR);
    if !bin_dir.is_dir() {
        return Err(LaunchError::OutputDirMissing(bin_dir));
    }

    [name.to_string(), format!("{name}{WINDOWS_EXE_SUFFIX}")]
        .into_iter()
        .map(|candidate| bin_dir.join(candidate))
        .find(|path| path.is_file())
        .ok_or_else(|| LaunchError::ArtifactMissing {
            name: name.to_string(),
            dir: bin_dir,
        })
}

/// Run the artifact with its output directory as working directory.
///
/// `Err` means the artifact could not be found or started; a binary that
/// runs and fails is an `Ok` record with its exit code.
pub async fn run_artifact(
    executor: &dyn CommandExecutor,
    project_root: &Path,
    build_dir: &Path,
    name: &str,
) -> Result<ExecutionRecord> {
    fs::create_dir_all(project_root.join(LOG_DIR))?;

    let binary = locate_artifact(build_dir, name)?;
    let bin_dir = build_dir.join(OUTPUT_DIR);

    info!(binary = %binary.display(), "Running");
    let out = executor
        .execute(&Invocation::new(binary.to_string_lossy()).current_dir(&bin_dir))
        .await?;

    println!("{}", out.stdout);
    if !out.stderr.is_empty() {
        eprintln!("{}", out.stderr);
    }

    Ok(ExecutionRecord {
        binary,
        stdout: out.stdout,
        stderr: out.stderr,
        exit_code: out.exit_code,
    })
}
