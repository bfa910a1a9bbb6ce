//! clang-format collaborator.
//!
//! Formatting is advisory: a missing formatter or a non-zero exit is logged
//! and the pipeline continues.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::env::ToolLocation;
use crate::error::{LaunchError, Result};
use crate::executor::{CommandExecutor, Invocation};
use crate::sources;

/// Extensions the formatter touches.
pub const FORMAT_EXTENSIONS: &[&str] = &["c", "h", "cpp", "hpp"];

/// Whether files are rewritten or only checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatMode {
    /// `-i`: rewrite files in place
    InPlace,
    /// `--dry-run -Werror`: fail on any needed change
    Check,
}

impl FormatMode {
    /// CI never rewrites sources.
    pub fn for_environment(is_ci: bool) -> Self {
        if is_ci {
            FormatMode::Check
        } else {
            FormatMode::InPlace
        }
    }

    fn flags(&self) -> &'static [&'static str] {
        match self {
            FormatMode::InPlace => &["--verbose", "-i"],
            FormatMode::Check => &["--verbose", "--dry-run", "-Werror"],
        }
    }
}

/// Result of a formatter pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatOutcome {
    /// Formatter unavailable.
    Skipped { reason: String },
    /// Nothing to format.
    NoSources,
    /// Formatter exited 0.
    Clean { files: usize },
    /// Formatter exited non-zero.
    Failed { exit_code: i32 },
}

/// Run clang-format over every source below `root`, skipping `prune` dirs.
pub async fn run_formatter(
    executor: &dyn CommandExecutor,
    formatter: &ToolLocation,
    root: &Path,
    mode: FormatMode,
    prune: &[&str],
) -> Result<FormatOutcome> {
    let Some(program) = formatter.path() else {
        warn!("clang-format not found in PATH; skipping clang-format step");
        return Ok(FormatOutcome::Skipped {
            reason: "clang-format not found".to_string(),
        });
    };

    let files = match sources::discover(root, FORMAT_EXTENSIONS, prune) {
        Ok(files) => files,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Cannot list sources; skipping clang-format step");
            return Ok(FormatOutcome::Skipped {
                reason: format!("cannot list sources: {e}"),
            });
        }
    };
    if files.is_empty() {
        info!(root = %root.display(), "No source files found to format");
        return Ok(FormatOutcome::NoSources);
    }

    info!(files = files.len(), mode = ?mode, "Running clang-format");

    let style = format!("--style=file:{}", root.join(".clang-format").display());
    let inv = Invocation::new(program.to_string_lossy())
        .args(mode.flags().iter().copied())
        .arg(style)
        .args(files.iter().map(|f| f.to_string_lossy().into_owned()))
        .current_dir(root);

    let out = match executor.execute(&inv).await {
        Ok(out) => out,
        Err(LaunchError::Spawn { program, source }) => {
            warn!(%program, error = %source, "clang-format could not be started; skipping");
            return Ok(FormatOutcome::Skipped {
                reason: source.to_string(),
            });
        }
        Err(e) => return Err(e),
    };

    if out.success() {
        info!("clang-format completed successfully");
        Ok(FormatOutcome::Clean { files: files.len() })
    } else {
        warn!(exit_code = out.exit_code, "clang-format returned non-zero exit code");
        if !out.stderr.trim().is_empty() {
            eprintln!("{}", out.stderr.trim_end());
        }
        Ok(FormatOutcome::Failed {
            exit_code: out.exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::fakes::RecordingExecutor;
    use std::fs;
    use std::path::PathBuf;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("src/main.c"), "int main(void){return 0;}").unwrap();
        fs::write(dir.path().join("src/main.h"), "").unwrap();
        fs::write(dir.path().join("build/gen.c"), "").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_missing_formatter_is_skipped() {
        let dir = project();
        let exec = RecordingExecutor::new();
        let outcome = run_formatter(
            &exec,
            &ToolLocation::NotFound,
            dir.path(),
            FormatMode::InPlace,
            &["build"],
        )
        .await
        .unwrap();

        assert!(matches!(outcome, FormatOutcome::Skipped { .. }));
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn test_check_mode_flags_and_pruning() {
        let dir = project();
        let exec = RecordingExecutor::new();
        let tool = ToolLocation::Found(PathBuf::from("/usr/bin/clang-format"));

        let outcome = run_formatter(&exec, &tool, dir.path(), FormatMode::Check, &["build"])
            .await
            .unwrap();
        assert_eq!(outcome, FormatOutcome::Clean { files: 2 });

        let inv = &exec.invocations()[0];
        assert!(inv.has_arg("--dry-run"));
        assert!(inv.has_arg("-Werror"));
        assert!(!inv.has_arg("-i"));
        assert!(!inv.args.iter().any(|a| a.ends_with("gen.c")));
        assert!(inv.args.iter().any(|a| a.starts_with("--style=file:")));
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        let dir = project();
        let exec = RecordingExecutor::with_responder(|_| Ok(CommandOutput::with_code(1)));
        let tool = ToolLocation::Found(PathBuf::from("clang-format"));

        let outcome = run_formatter(&exec, &tool, dir.path(), FormatMode::InPlace, &["build"])
            .await
            .unwrap();
        assert_eq!(outcome, FormatOutcome::Failed { exit_code: 1 });
    }

    #[tokio::test]
    async fn test_unlistable_root_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecordingExecutor::new();
        let tool = ToolLocation::Found(PathBuf::from("clang-format"));

        let outcome = run_formatter(
            &exec,
            &tool,
            &dir.path().join("moved_away"),
            FormatMode::Check,
            &["build"],
        )
        .await
        .unwrap();
        assert!(matches!(outcome, FormatOutcome::Skipped { reason } if reason.starts_with("cannot list sources")));
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn test_ci_only_checks() {
        assert_eq!(FormatMode::for_environment(true), FormatMode::Check);
        assert_eq!(FormatMode::for_environment(false), FormatMode::InPlace);
    }
}
