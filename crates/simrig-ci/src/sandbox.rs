//! Copy-test sandbox: rehearse the standalone pipeline on a disposable copy.
//!
//! State machine:
//!
//! ```text
//! REQUESTED ─▶ (exists && rebuild: delete) ─▶ (absent: COPY)
//!           ─▶ DELEGATE_BUILD_AND_RUN ─▶ VALIDATE ─▶ ok ? CLEANUP : PRESERVE
//! ```
//!
//! A sandbox whose log fails validation is never deleted; its path and a
//! log-inspection hint are reported instead.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{LaunchError, Result};
use crate::executor::{CommandExecutor, Invocation};
use crate::validate::{self, TestKind, ValidationReport};

/// How the sandbox directory came to exist for this session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    /// Copied from the source tree by this session.
    FreshlyCopied,
    /// Left behind by an earlier run and reused.
    ExistingFromPriorRun,
}

/// What happened to the sandbox directory at the end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxDisposition {
    CleanedUp,
    Preserved,
}

/// Result of a sandbox session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxOutcome {
    pub temp_dir: PathBuf,

    pub test_kind: TestKind,

    pub state: SandboxState,

    /// Exit code of the delegated launcher run.
    pub launch_exit: i32,

    pub validation: ValidationReport,

    pub disposition: SandboxDisposition,

    /// Exit code the session reports: the delegated code, or 1 when
    /// validation failed behind a successful delegated run.
    pub exit_code: i32,
}

/// One copy-test of a project subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSession {
    pub source_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub test_kind: TestKind,
    /// Set once this session copied the tree itself.
    pub owns_temp_dir: bool,
}

impl SandboxSession {
    /// Session for `<repo_root>/<subdir>` in `<repo_root>/../<subdir>_test`.
    pub fn new(repo_root: &Path, subdir: &str, test_kind: TestKind) -> Self {
        let parent = repo_root.parent().unwrap_or(repo_root);
        Self::with_temp_dir(
            repo_root.join(subdir),
            parent.join(format!("{subdir}_test")),
            test_kind,
        )
    }

    pub fn with_temp_dir(
        source_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        test_kind: TestKind,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            temp_dir: temp_dir.into(),
            test_kind,
            owns_temp_dir: false,
        }
    }

    /// Launcher command the sandbox delegates to.
    pub fn delegate_command(&self) -> &'static str {
        match self.test_kind {
            TestKind::Sim => "xfe_control_sim",
            TestKind::Discon => "discon",
        }
    }

    /// Bring the temp directory into a usable state.
    ///
    /// With `rebuild` an existing sandbox is deleted first; the tree is
    /// copied if and only if the sandbox is then absent. A copy that fails
    /// leaves no sandbox behind.
    pub fn prepare(&mut self, rebuild: bool) -> Result<SandboxState> {
        if !self.source_dir.is_dir() {
            return Err(LaunchError::SandboxSourceMissing(self.source_dir.clone()));
        }

        if rebuild && self.temp_dir.exists() {
            info!(temp_dir = %self.temp_dir.display(), "Removing previous sandbox");
            fs::remove_dir_all(&self.temp_dir)?;
        }

        if self.temp_dir.exists() {
            return Ok(SandboxState::ExistingFromPriorRun);
        }

        info!(
            from = %self.source_dir.display(),
            to = %self.temp_dir.display(),
            "Copying project into sandbox"
        );
        copy_tree(&self.source_dir, &self.temp_dir)?;
        self.owns_temp_dir = true;
        Ok(SandboxState::FreshlyCopied)
    }

    /// Prepare, delegate to `launcher` inside the sandbox, validate, then
    /// clean up or preserve.
    pub async fn run(
        mut self,
        executor: &dyn CommandExecutor,
        launcher: &Path,
        rebuild: bool,
    ) -> Result<SandboxOutcome> {
        info!(
            kind = ?self.test_kind,
            temp_dir = %self.temp_dir.display(),
            "Testing in temporary dir"
        );
        if !launcher.is_file() {
            return Err(LaunchError::LauncherMissing(launcher.to_path_buf()));
        }

        let state = self.prepare(rebuild)?;

        let inv = Invocation::new(launcher.to_string_lossy())
            .arg(self.delegate_command())
            .arg(if rebuild { "1" } else { "0" })
            .arg("--project-root")
            .arg(self.temp_dir.to_string_lossy())
            .current_dir(&self.temp_dir)
            .inherit_output();

        info!(command = %inv.display(), "Building + running inside sandbox");
        let launch_exit = executor.execute(&inv).await?.exit_code;

        if launch_exit == 0 {
            info!(kind = ?self.test_kind, "Sandbox test run succeeded");
        } else {
            error!(kind = ?self.test_kind, exit_code = launch_exit, "Sandbox test run failed");
        }

        let log_file = validate::log_path(&self.temp_dir);
        let validation = validate::validate_file(&log_file, self.test_kind)?;

        let (disposition, exit_code) = if validation.ok {
            info!(temp_dir = %self.temp_dir.display(), "Log validation passed. Cleaning up temp folder");
            match fs::remove_dir_all(&self.temp_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            (SandboxDisposition::CleanedUp, launch_exit)
        } else {
            for violation in validation.violations() {
                error!("{violation}");
            }
            eprintln!(
                "Log validation failed. Preserving temp folder for inspection: {}",
                self.temp_dir.display()
            );
            eprintln!("   You can inspect the log with: less '{}'", log_file.display());
            let code = if launch_exit != 0 { launch_exit } else { 1 };
            (SandboxDisposition::Preserved, code)
        };

        Ok(SandboxOutcome {
            temp_dir: self.temp_dir,
            test_kind: self.test_kind,
            state,
            launch_exit,
            validation,
            disposition,
            exit_code,
        })
    }
}

/// Recursively copy `src` to `dst` (which must not exist yet).
///
/// The tree is assembled in a sibling staging directory and renamed into
/// place, so `dst` only ever appears complete.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let staging = staging_dir(dst);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    if let Err(e) = copy_entries(src, &staging) {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!(staging = %staging.display(), error = %cleanup, "Could not remove partial sandbox copy");
        }
        return Err(e);
    }

    fs::rename(&staging, dst)?;
    Ok(())
}

/// `<dst>.partial`, next to `dst`.
fn staging_dir(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    dst.with_file_name(name)
}

fn copy_entries(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    if link.is_file() {
        fs::copy(link, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("repo/sim_example");
        fs::create_dir_all(sub.join("src")).unwrap();
        fs::write(sub.join("CMakeLists.txt"), "project(sim)").unwrap();
        fs::write(sub.join("src/main.c"), "int main(void){return 0;}").unwrap();
        dir
    }

    #[test]
    fn test_temp_dir_next_to_repo() {
        let session = SandboxSession::new(Path::new("/work/xfe"), "sim_example", TestKind::Sim);
        assert_eq!(session.source_dir, PathBuf::from("/work/xfe/sim_example"));
        assert_eq!(session.temp_dir, PathBuf::from("/work/sim_example_test"));
        assert_eq!(session.delegate_command(), "xfe_control_sim");
        assert!(!session.owns_temp_dir);
    }

    #[test]
    fn test_prepare_copies_when_absent() {
        let dir = source_tree();
        let repo = dir.path().join("repo");
        let mut session = SandboxSession::new(&repo, "sim_example", TestKind::Discon);

        assert_eq!(session.prepare(false).unwrap(), SandboxState::FreshlyCopied);
        assert!(session.owns_temp_dir);
        assert!(session.temp_dir.join("src/main.c").is_file());
        assert_eq!(session.delegate_command(), "discon");
    }

    #[test]
    fn test_prepare_reuses_without_rebuild() {
        let dir = source_tree();
        let repo = dir.path().join("repo");
        let mut first = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        first.prepare(false).unwrap();
        fs::write(first.temp_dir.join("marker"), "from earlier run").unwrap();

        let mut second = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        assert_eq!(
            second.prepare(false).unwrap(),
            SandboxState::ExistingFromPriorRun
        );
        assert!(!second.owns_temp_dir);
        assert!(second.temp_dir.join("marker").exists());
    }

    #[test]
    fn test_prepare_rebuild_forces_fresh_copy() {
        let dir = source_tree();
        let repo = dir.path().join("repo");
        let mut first = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        first.prepare(false).unwrap();
        fs::write(first.temp_dir.join("marker"), "stale").unwrap();

        let mut second = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        assert_eq!(second.prepare(true).unwrap(), SandboxState::FreshlyCopied);
        assert!(!second.temp_dir.join("marker").exists());
        assert!(second.temp_dir.join("CMakeLists.txt").exists());
    }

    #[test]
    fn test_mistyped_subdir_never_leaves_a_sandbox() {
        let dir = source_tree();
        let repo = dir.path().join("repo");

        let mut first = SandboxSession::new(&repo, "sim_exmple", TestKind::Sim);
        let err = first.prepare(false).unwrap_err();
        assert!(matches!(err, LaunchError::SandboxSourceMissing(_)));
        assert!(!first.temp_dir.exists());
        assert!(!first.owns_temp_dir);

        let mut second = SandboxSession::new(&repo, "sim_exmple", TestKind::Sim);
        assert!(matches!(
            second.prepare(false),
            Err(LaunchError::SandboxSourceMissing(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupted_copy_is_retried_next_run() {
        let dir = source_tree();
        let repo = dir.path().join("repo");
        let socket = repo.join("sim_example/src/ipc.sock");
        let listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

        let mut first = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        assert!(first.prepare(false).is_err());
        assert!(!first.temp_dir.exists());
        assert!(!staging_dir(&first.temp_dir).exists());

        drop(listener);
        fs::remove_file(&socket).unwrap();

        let mut second = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        assert_eq!(second.prepare(false).unwrap(), SandboxState::FreshlyCopied);
        assert!(second.temp_dir.join("src/main.c").is_file());
    }

    #[tokio::test]
    async fn test_missing_launcher_copies_nothing() {
        let dir = source_tree();
        let repo = dir.path().join("repo");
        let session = SandboxSession::new(&repo, "sim_example", TestKind::Sim);
        let temp_dir = session.temp_dir.clone();
        let exec = crate::fakes::RecordingExecutor::new();

        let err = session
            .run(&exec, &dir.path().join("gone"), false)
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::LauncherMissing(_)));
        assert!(!temp_dir.exists());
        assert_eq!(exec.call_count(), 0);
    }
}
