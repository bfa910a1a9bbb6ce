//! Launcher: sequences the stages of each entry point and records them.
//!
//! Stages run strictly one after another. Advisory stages (sync, format,
//! analysis) never change the exit code; a failed build aborts the run with
//! the build's exit code; execution and validation decide the rest.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::analysis::{AnalysisOutcome, AnalysisRunner, SourceMode};
use crate::build::{BuildCoordinator, BuildRequest, TargetKind};
use crate::env::ProbeReport;
use crate::error::{LaunchError, Result};
use crate::executor::{CommandExecutor, SystemExecutor};
use crate::formatter::{self, FormatMode, FormatOutcome};
use crate::git;
use crate::process;
use crate::report::{LaunchMode, LaunchReport, ReportBuilder, Stage, StageStatus};
use crate::sandbox::{SandboxDisposition, SandboxSession};
use crate::sync::{self, FileSync, SyncOutcome};
use crate::validate::{self, TestKind};

/// `path` joined onto the current directory when it is relative.
///
/// Children run with their own working directories, so every path handed
/// to them must be absolute.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Runs launcher entry points against one probed environment.
#[derive(Clone)]
pub struct Launcher {
    pub probe: ProbeReport,
    pub executor: Arc<dyn CommandExecutor>,
}

impl Launcher {
    pub fn new(probe: ProbeReport, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { probe, executor }
    }

    /// Launcher backed by real processes.
    pub fn system(probe: ProbeReport) -> Self {
        Self::new(probe, Arc::new(SystemExecutor))
    }

    fn is_ci(&self) -> bool {
        self.probe.profile.is_ci
    }

    /// Build and run `target` from `project_root/<build_dir_name>`.
    ///
    /// Formatting and analysis cover the enclosing git checkout, or the
    /// project root when there is none.
    pub async fn run_standalone(
        &self,
        project_root: &Path,
        build_dir_name: &str,
        target: TargetKind,
        rebuild: bool,
        verbose: bool,
    ) -> Result<LaunchReport> {
        let mut report = ReportBuilder::start(LaunchMode::Standalone);
        let project_root = absolute(project_root)?;
        let project_root = project_root.as_path();

        let repo_root = match git::find_repo_root(self.executor.as_ref(), Some(project_root)).await {
            Ok(Some(root)) => root,
            Ok(None) => {
                info!("Not in a git repository - using local directory structure");
                project_root.to_path_buf()
            }
            Err(LaunchError::ToolNotFound(tool)) => {
                warn!(%tool, "git not available - using local directory structure");
                project_root.to_path_buf()
            }
            Err(e) => return Err(e),
        };

        let build_dir = project_root.join(build_dir_name);
        self.format_stage(&mut report, &repo_root, build_dir_name).await?;

        info!(binary = target.binary_name(), "Building");
        let request = BuildRequest::for_target(project_root, &build_dir, target, rebuild, verbose);
        if let Some(code) = self.build_stage(&mut report, &request).await? {
            return Ok(report.finish(code));
        }

        self.analysis_stage(&mut report, &repo_root, &build_dir).await?;

        let validate_kind = match target {
            TargetKind::PrimaryExecutable => Some(TestKind::Sim),
            TargetKind::SharedLibraryTest => None,
        };
        let code = self
            .execute_stage(&mut report, project_root, &build_dir, target, validate_kind)
            .await?;
        Ok(report.finish(code))
    }

    /// Sync the support files, then build and run the primary executable
    /// from the repository root.
    pub async fn run_main_repo(
        &self,
        repo_root: &Path,
        subdir: &str,
        rebuild: bool,
        verbose: bool,
    ) -> Result<LaunchReport> {
        let mut report = ReportBuilder::start(LaunchMode::MainRepo);
        let repo_root = absolute(repo_root)?;
        let repo_root = repo_root.as_path();
        let build_name = "build";
        let build_dir = repo_root.join(build_name);

        self.sync_stage(&mut report, repo_root, subdir)?;
        self.format_stage(&mut report, repo_root, build_name).await?;

        info!("Building xfe_control_sim from main repo");
        let request = BuildRequest::for_target(
            repo_root,
            &build_dir,
            TargetKind::PrimaryExecutable,
            rebuild,
            verbose,
        );
        if let Some(code) = self.build_stage(&mut report, &request).await? {
            return Ok(report.finish(code));
        }

        self.analysis_stage(&mut report, repo_root, &build_dir).await?;

        let code = self
            .execute_stage(
                &mut report,
                repo_root,
                &build_dir,
                TargetKind::PrimaryExecutable,
                Some(TestKind::Sim),
            )
            .await?;
        Ok(report.finish(code))
    }

    /// Rehearse `<repo_root>/<subdir>` in a disposable sibling copy.
    ///
    /// `launcher_exe` is the launcher binary re-invoked inside the copy.
    pub async fn run_copy_test(
        &self,
        repo_root: &Path,
        subdir: &str,
        kind: TestKind,
        rebuild: bool,
        launcher_exe: &Path,
    ) -> Result<LaunchReport> {
        let mut report = ReportBuilder::start(LaunchMode::CopyTest);
        let repo_root = absolute(repo_root)?;
        let repo_root = repo_root.as_path();
        let launcher_exe = absolute(launcher_exe)?;
        let launcher_exe = launcher_exe.as_path();

        self.sync_stage(&mut report, repo_root, subdir)?;
        self.format_stage(&mut report, repo_root, "build").await?;

        report.begin();
        let session = SandboxSession::new(repo_root, subdir, kind);
        let outcome = session
            .run(self.executor.as_ref(), launcher_exe, rebuild)
            .await?;

        let status = match outcome.disposition {
            SandboxDisposition::CleanedUp if outcome.exit_code == 0 => StageStatus::Passed,
            _ => StageStatus::Failed {
                exit_code: outcome.exit_code,
            },
        };
        report.record(Stage::Sandbox, status);

        let code = outcome.exit_code;
        report.validation(outcome.validation.clone());
        report.sandbox(outcome);
        Ok(report.finish(code))
    }

    /// Format every source below `root`; `check` forces a dry run.
    pub async fn run_format(&self, root: &Path, check: bool) -> Result<LaunchReport> {
        let mut report = ReportBuilder::start(LaunchMode::Format);
        let root = absolute(root)?;
        let root = root.as_path();
        let mode = if check || self.is_ci() {
            FormatMode::Check
        } else {
            FormatMode::InPlace
        };

        report.begin();
        let outcome =
            formatter::run_formatter(self.executor.as_ref(), &self.probe.tools.formatter, root, mode, &["build"])
                .await?;
        let code = match &outcome {
            FormatOutcome::Failed { exit_code } => *exit_code,
            _ => 0,
        };
        report.record(Stage::Format, format_status(outcome));
        Ok(report.finish(code))
    }

    /// Run the analyzer on its own; the driver's exit code is the run's.
    pub async fn run_analysis(
        &self,
        project_root: &Path,
        build_dir: &Path,
        mode: SourceMode,
    ) -> Result<LaunchReport> {
        let mut report = ReportBuilder::start(LaunchMode::Analyze);
        let project_root = absolute(project_root)?;
        let project_root = project_root.as_path();
        let build_dir = absolute(build_dir)?;
        let build_dir = build_dir.as_path();

        report.begin();
        let outcome = AnalysisRunner::new(&self.probe, self.executor.as_ref())
            .run(project_root, build_dir, mode)
            .await?;
        let code = match &outcome {
            AnalysisOutcome::Ran(r) => r.return_code,
            _ => 0,
        };
        report.record(Stage::Analysis, analysis_status(outcome));
        Ok(report.finish(code))
    }

    fn sync_stage(&self, report: &mut ReportBuilder, repo_root: &Path, subdir: &str) -> Result<()> {
        report.begin();
        let status = match sync::sync_support_files(repo_root, subdir, self.is_ci())? {
            SyncOutcome::SkippedInCi => StageStatus::Skipped {
                reason: "ci".to_string(),
            },
            SyncOutcome::DestinationMissing(dest) => StageStatus::Skipped {
                reason: format!("{} not found", dest.display()),
            },
            SyncOutcome::Synced(files) => {
                let missing = files
                    .iter()
                    .filter(|(_, status)| *status == FileSync::SourceMissing)
                    .count();
                if missing == files.len() {
                    StageStatus::Skipped {
                        reason: "no support files at repository root".to_string(),
                    }
                } else {
                    StageStatus::Passed
                }
            }
        };
        report.record(Stage::Sync, status);
        Ok(())
    }

    async fn format_stage(&self, report: &mut ReportBuilder, root: &Path, build_name: &str) -> Result<()> {
        report.begin();
        let outcome = formatter::run_formatter(
            self.executor.as_ref(),
            &self.probe.tools.formatter,
            root,
            FormatMode::for_environment(self.is_ci()),
            &[build_name],
        )
        .await?;
        report.record(Stage::Format, format_status(outcome));
        Ok(())
    }

    /// `Some(exit_code)` when the build failed and the run must stop.
    async fn build_stage(&self, report: &mut ReportBuilder, request: &BuildRequest) -> Result<Option<i32>> {
        report.begin();
        let result = BuildCoordinator::new(&self.probe.profile, self.executor.as_ref())
            .run(request)
            .await?;

        if result.succeeded() {
            report.record(Stage::Build, StageStatus::Passed);
            return Ok(None);
        }

        let code = if result.exit_code == 0 { 1 } else { result.exit_code };
        error!(exit_code = code, "Build failed; aborting");
        report.record(Stage::Build, StageStatus::Failed { exit_code: code });
        Ok(Some(code))
    }

    async fn analysis_stage(&self, report: &mut ReportBuilder, root: &Path, build_dir: &Path) -> Result<()> {
        report.begin();
        let outcome = AnalysisRunner::new(&self.probe, self.executor.as_ref())
            .run_if_enabled(root, build_dir, SourceMode::default())
            .await?;
        report.record(Stage::Analysis, analysis_status(outcome));
        Ok(())
    }

    /// Run the artifact, dump its log and validate it when `validate_kind`
    /// is set. Returns the run's exit code.
    async fn execute_stage(
        &self,
        report: &mut ReportBuilder,
        project_root: &Path,
        build_dir: &Path,
        target: TargetKind,
        validate_kind: Option<TestKind>,
    ) -> Result<i32> {
        report.begin();
        let record = match process::run_artifact(
            self.executor.as_ref(),
            project_root,
            build_dir,
            target.binary_name(),
        )
        .await
        {
            Ok(record) => record,
            Err(
                e @ (LaunchError::OutputDirMissing(_)
                | LaunchError::ArtifactMissing { .. }
                | LaunchError::Spawn { .. }),
            ) => {
                error!(error = %e, "Could not run artifact");
                report.record(Stage::Execute, StageStatus::Failed { exit_code: e.exit_code() });
                return Ok(e.exit_code());
            }
            Err(e) => return Err(e),
        };

        let mut code = record.exit_code;
        if code == 0 {
            report.record(Stage::Execute, StageStatus::Passed);
        } else {
            error!(binary = %record.binary.display(), exit_code = code, "Artifact exited non-zero");
            report.record(Stage::Execute, StageStatus::Failed { exit_code: code });
        }

        let log_file = validate::log_path(project_root);
        dump_log(&log_file);

        report.begin();
        let Some(kind) = validate_kind else {
            if code == 0 {
                info!("{} passed", target.binary_name());
            }
            report.record(
                Stage::Validate,
                StageStatus::Skipped {
                    reason: "judged by exit code".to_string(),
                },
            );
            return Ok(code);
        };

        let validation = validate::validate_file(&log_file, kind)?;
        if validation.ok {
            info!("Log validation passed");
            report.record(Stage::Validate, StageStatus::Passed);
        } else {
            for violation in validation.violations() {
                error!("{violation}");
            }
            if code == 0 {
                code = 1;
            }
            report.record(Stage::Validate, StageStatus::Failed { exit_code: 1 });
        }
        report.validation(validation);
        Ok(code)
    }
}

fn format_status(outcome: FormatOutcome) -> StageStatus {
    match outcome {
        FormatOutcome::Skipped { reason } => StageStatus::Skipped { reason },
        FormatOutcome::NoSources => StageStatus::Skipped {
            reason: "no sources".to_string(),
        },
        FormatOutcome::Clean { .. } => StageStatus::Passed,
        FormatOutcome::Failed { exit_code } => StageStatus::Failed { exit_code },
    }
}

fn analysis_status(outcome: AnalysisOutcome) -> StageStatus {
    match outcome {
        AnalysisOutcome::Disabled => StageStatus::Skipped {
            reason: "RUN_CLANG_TIDY disabled".to_string(),
        },
        AnalysisOutcome::Skipped { reason } => StageStatus::Skipped { reason },
        AnalysisOutcome::Ran(r) if r.clean() => StageStatus::Passed,
        AnalysisOutcome::Ran(r) => StageStatus::Failed {
            exit_code: r.return_code,
        },
    }
}

/// Print the simulation log for the console record.
fn dump_log(log_file: &Path) {
    match fs::read(log_file) {
        Ok(bytes) => {
            println!("Contents of simulation log:");
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        Err(_) => warn!(path = %log_file.display(), "Log file not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::env::{Generator, HostOs, Settings, ToolInventory, ToolLocation, ToolchainProfile};
    use crate::executor::CommandOutput;
    use crate::fakes::RecordingExecutor;
    use crate::process::OUTPUT_DIR;

    fn probe() -> ProbeReport {
        ProbeReport {
            profile: ToolchainProfile {
                c_compiler: PathBuf::from("clang"),
                cxx_compiler: PathBuf::from("clang++"),
                generator: Generator::Ninja,
                parallelism: 2,
                is_ci: false,
                os: HostOs::Linux,
                os_name: "linux".to_string(),
                prefix_path: None,
                sdk_root: None,
                analysis_cache_dir: None,
            },
            tools: ToolInventory {
                formatter: ToolLocation::NotFound,
                analyzer: ToolLocation::NotFound,
            },
            settings: Settings {
                analysis_enabled: false,
            },
        }
    }

    /// A project whose build directory already holds the artifact.
    fn built_project(binary: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("build").join(OUTPUT_DIR);
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join(binary), "").unwrap();
        dir
    }

    #[test]
    fn test_relative_paths_resolve_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let resolved = absolute(Path::new("sim_example/build")).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, cwd.join("sim_example/build"));

        let fixed = Path::new("/work/sim_example");
        assert_eq!(absolute(fixed).unwrap(), fixed);
    }

    #[tokio::test]
    async fn test_build_failure_aborts_with_build_code() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(RecordingExecutor::with_responder(|inv| {
            if inv.program == "cmake" {
                Ok(CommandOutput::with_code(7))
            } else {
                Ok(CommandOutput::with_code(128))
            }
        }));
        let launcher = Launcher::new(probe(), exec.clone());

        let report = launcher
            .run_standalone(dir.path(), "build", TargetKind::PrimaryExecutable, true, false)
            .await
            .unwrap();

        assert_eq!(report.exit_code, 7);
        assert!(report.stage(Stage::Build).unwrap().failed());
        assert!(report.stage(Stage::Execute).is_none());
        assert!(exec.calls_to("ninja").is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_exit_one() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build")).unwrap();
        let launcher = Launcher::new(probe(), Arc::new(RecordingExecutor::new()));

        let report = launcher
            .run_standalone(dir.path(), "build", TargetKind::PrimaryExecutable, false, false)
            .await
            .unwrap();

        assert_eq!(report.exit_code, 1);
        assert_eq!(
            report.stage(Stage::Execute).unwrap().status,
            StageStatus::Failed { exit_code: 1 }
        );
        assert!(report.validation.is_none());
    }

    #[tokio::test]
    async fn test_shared_library_test_judged_by_exit_code() {
        let dir = built_project("qblade_interface_test");
        let exec = Arc::new(RecordingExecutor::with_responder(|inv| {
            if inv.program.ends_with("qblade_interface_test") {
                Ok(CommandOutput::with_code(3))
            } else {
                Ok(CommandOutput::ok())
            }
        }));
        let launcher = Launcher::new(probe(), exec);

        let report = launcher
            .run_standalone(dir.path(), "build", TargetKind::SharedLibraryTest, false, false)
            .await
            .unwrap();

        assert_eq!(report.exit_code, 3);
        assert!(matches!(
            report.stage(Stage::Validate).unwrap().status,
            StageStatus::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_runtime_failure_wins_over_validation() {
        let dir = built_project("xfe_control_sim");
        let exec = Arc::new(RecordingExecutor::with_responder(|inv| {
            if inv.program.ends_with("xfe_control_sim") {
                Ok(CommandOutput::with_code(4))
            } else {
                Ok(CommandOutput::ok())
            }
        }));
        let launcher = Launcher::new(probe(), exec);

        let report = launcher
            .run_standalone(dir.path(), "build", TargetKind::PrimaryExecutable, false, false)
            .await
            .unwrap();

        assert_eq!(report.exit_code, 4);
        let validation = report.validation.unwrap();
        assert!(!validation.log_found);
    }

    #[tokio::test]
    async fn test_format_check_failure_sets_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.c"), "int main(void){return 0;}").unwrap();
        let mut probe = probe();
        probe.tools.formatter = ToolLocation::Found(PathBuf::from("/usr/bin/clang-format"));
        let exec = Arc::new(RecordingExecutor::with_responder(|_| Ok(CommandOutput::with_code(1))));
        let launcher = Launcher::new(probe, exec.clone());

        let report = launcher.run_format(dir.path(), true).await.unwrap();

        assert_eq!(report.exit_code, 1);
        assert!(exec.invocations()[0].has_arg("--dry-run"));
    }

    #[tokio::test]
    async fn test_analysis_without_driver_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Launcher::new(probe(), Arc::new(RecordingExecutor::new()));

        let report = launcher
            .run_analysis(dir.path(), &dir.path().join("build"), SourceMode::All)
            .await
            .unwrap();

        assert!(report.success());
        assert!(matches!(
            report.stage(Stage::Analysis).unwrap().status,
            StageStatus::Skipped { .. }
        ));
    }
}
