//! Static analysis via the `run-clang-tidy` driver.
//!
//! Findings are advisory: a non-zero driver exit is recorded in the
//! [`AnalysisReport`] and the pipeline continues. CI makes findings blocking
//! by passing `-warnings-as-errors=*` so the driver itself fails loudly.
//!
//! The analyzer reads `compile_commands.json` from the build directory but
//! does not check that it matches the current sources; callers compile first
//! when freshness matters.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::env::ProbeReport;
use crate::error::{LaunchError, Result};
use crate::executor::{CommandExecutor, Invocation};
use crate::sources;

/// Log file written below the build directory.
pub const ANALYSIS_LOG: &str = "analysis.log";

/// Which sources are analysed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    C,
    Cpp,
    /// C and C++ (`both` and `all` are accepted).
    All,
}

impl SourceMode {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            SourceMode::C => &["c"],
            SourceMode::Cpp => &["cc", "cpp", "cxx"],
            SourceMode::All => &["c", "cc", "cpp", "cxx"],
        }
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "c" => Ok(SourceMode::C),
            "cpp" => Ok(SourceMode::Cpp),
            "both" | "all" => Ok(SourceMode::All),
            other => Err(format!("unknown source mode `{other}` (expected c, cpp, both or all)")),
        }
    }
}

/// A finished analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisReport {
    /// `<build_dir>/analysis.log`
    pub log_path: PathBuf,

    /// Driver exit code.
    pub return_code: i32,
}

impl AnalysisReport {
    pub fn clean(&self) -> bool {
        self.return_code == 0
    }
}

/// Whether analysis ran and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Switched off through `RUN_CLANG_TIDY`.
    Disabled,
    /// Driver unavailable or could not start.
    Skipped { reason: String },
    Ran(AnalysisReport),
}

/// Runs the static analyzer for one project/build directory pair.
pub struct AnalysisRunner<'a> {
    probe: &'a ProbeReport,
    executor: &'a dyn CommandExecutor,
}

impl<'a> AnalysisRunner<'a> {
    pub fn new(probe: &'a ProbeReport, executor: &'a dyn CommandExecutor) -> Self {
        Self { probe, executor }
    }

    /// Analyse `mode` sources below `project_root` against `build_dir`.
    ///
    /// Honors the `analysis_enabled` setting; use [`AnalysisRunner::run`]
    /// to bypass it.
    pub async fn run_if_enabled(
        &self,
        project_root: &Path,
        build_dir: &Path,
        mode: SourceMode,
    ) -> Result<AnalysisOutcome> {
        if !self.probe.settings.analysis_enabled {
            info!("RUN_CLANG_TIDY not set; skipping clang-tidy step");
            return Ok(AnalysisOutcome::Disabled);
        }
        self.run(project_root, build_dir, mode).await
    }

    /// Analyse `mode` sources below `project_root` against `build_dir`.
    pub async fn run(
        &self,
        project_root: &Path,
        build_dir: &Path,
        mode: SourceMode,
    ) -> Result<AnalysisOutcome> {
        let Some(driver) = self.probe.tools.analyzer.path() else {
            warn!("run-clang-tidy not found in PATH; skipping clang-tidy step");
            return Ok(AnalysisOutcome::Skipped {
                reason: "run-clang-tidy not found".to_string(),
            });
        };

        let log_path = build_dir.join(ANALYSIS_LOG);
        // Truncate before running so a stale log can never pass for this run.
        let mut log = match fs::create_dir_all(build_dir).and_then(|()| fs::File::create(&log_path)) {
            Ok(log) => log,
            Err(e) => return Ok(skipped("cannot write analysis log", e.into())),
        };

        let build_name = dir_name(build_dir);
        let files = match sources::discover(project_root, mode.extensions(), &[build_name.as_str()]) {
            Ok(files) => files,
            Err(e) => return Ok(skipped("cannot list sources", e)),
        };
        let inv = self.invocation(driver, project_root, build_dir, &files);

        info!(
            mode = ?mode,
            files = files.len(),
            log = %log_path.display(),
            "Running clang-tidy"
        );

        let out = match self.executor.execute(&inv).await {
            Ok(out) => out,
            Err(LaunchError::Spawn { program, source }) => {
                warn!(%program, error = %source, "clang-tidy could not be started; skipping");
                return Ok(AnalysisOutcome::Skipped {
                    reason: source.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let combined = out.combined();
        for line in combined.lines() {
            println!("{line}");
        }
        log.write_all(combined.as_bytes())?;

        if !out.success() {
            warn!(
                exit_code = out.exit_code,
                log = %log_path.display(),
                "clang-tidy returned non-zero"
            );
        }

        Ok(AnalysisOutcome::Ran(AnalysisReport {
            log_path,
            return_code: out.exit_code,
        }))
    }

    /// Driver command line for `files`.
    pub fn invocation(
        &self,
        driver: &Path,
        project_root: &Path,
        build_dir: &Path,
        files: &[PathBuf],
    ) -> Invocation {
        let profile = &self.probe.profile;
        let mut inv = Invocation::new(driver.to_string_lossy())
            .arg(format!("-j{}", profile.parallelism))
            .arg(format!("-p={}", build_dir.display()));

        if let Some(sdk) = &profile.sdk_root {
            inv = inv.arg(format!("-extra-arg=-isysroot{}", sdk.display()));
        }

        let config = project_root.join(".clang-tidy");
        if config.is_file() {
            inv = inv.arg(format!("-config-file={}", config.display()));
        } else {
            warn!(path = %config.display(), "Config file not found");
        }

        if profile.is_ci {
            inv = inv.arg("-warnings-as-errors=*");
        }

        inv.args(files.iter().map(|f| f.to_string_lossy().into_owned()))
            .current_dir(project_root)
            .env("PROJECT_ROOT", project_root.to_string_lossy())
            .env("BUILD_DIR", build_dir.to_string_lossy())
    }
}

/// Advisory skip for an IO or walk failure around the analyzer run.
fn skipped(what: &str, err: LaunchError) -> AnalysisOutcome {
    warn!(error = %err, "{what}; skipping clang-tidy step");
    AnalysisOutcome::Skipped {
        reason: format!("{what}: {err}"),
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "build".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Generator, HostOs, Settings, ToolInventory, ToolLocation, ToolchainProfile};
    use crate::executor::CommandOutput;
    use crate::fakes::RecordingExecutor;

    fn probe(is_ci: bool, analyzer: ToolLocation, sdk_root: Option<PathBuf>) -> ProbeReport {
        ProbeReport {
            profile: ToolchainProfile {
                c_compiler: PathBuf::from("clang"),
                cxx_compiler: PathBuf::from("clang++"),
                generator: Generator::Make,
                parallelism: 3,
                is_ci,
                os: HostOs::Linux,
                os_name: "linux".to_string(),
                prefix_path: None,
                sdk_root,
                analysis_cache_dir: None,
            },
            tools: ToolInventory {
                formatter: ToolLocation::NotFound,
                analyzer,
            },
            settings: Settings {
                analysis_enabled: true,
            },
        }
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/flow.c"), "").unwrap();
        fs::write(dir.path().join("src/gui.cpp"), "").unwrap();
        fs::write(dir.path().join(".clang-tidy"), "Checks: '*'").unwrap();
        dir
    }

    #[test]
    fn test_source_mode_parse() {
        assert_eq!("c".parse::<SourceMode>().unwrap(), SourceMode::C);
        assert_eq!("cpp".parse::<SourceMode>().unwrap(), SourceMode::Cpp);
        assert_eq!("both".parse::<SourceMode>().unwrap(), SourceMode::All);
        assert_eq!("all".parse::<SourceMode>().unwrap(), SourceMode::All);
        assert!("rust".parse::<SourceMode>().is_err());
    }

    #[tokio::test]
    async fn test_missing_driver_is_skipped() {
        let dir = project();
        let p = probe(false, ToolLocation::NotFound, None);
        let exec = RecordingExecutor::new();
        let outcome = AnalysisRunner::new(&p, &exec)
            .run(dir.path(), &dir.path().join("build"), SourceMode::C)
            .await
            .unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Skipped { .. }));
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unlistable_sources_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = probe(false, ToolLocation::Found(PathBuf::from("run-clang-tidy")), None);
        let exec = RecordingExecutor::new();
        let outcome = AnalysisRunner::new(&p, &exec)
            .run(&dir.path().join("moved_away"), &dir.path().join("build"), SourceMode::C)
            .await
            .unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Skipped { reason } if reason.starts_with("cannot list sources")));
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_log_is_skipped_not_fatal() {
        let dir = project();
        let blocker = dir.path().join("build");
        fs::write(&blocker, "a file where the build dir should be").unwrap();
        let p = probe(false, ToolLocation::Found(PathBuf::from("run-clang-tidy")), None);
        let exec = RecordingExecutor::new();
        let outcome = AnalysisRunner::new(&p, &exec)
            .run(dir.path(), &blocker.join("nested"), SourceMode::C)
            .await
            .unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Skipped { .. }));
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_by_setting() {
        let dir = project();
        let mut p = probe(false, ToolLocation::Found(PathBuf::from("run-clang-tidy")), None);
        p.settings.analysis_enabled = false;
        let exec = RecordingExecutor::new();
        let outcome = AnalysisRunner::new(&p, &exec)
            .run_if_enabled(dir.path(), &dir.path().join("build"), SourceMode::C)
            .await
            .unwrap();
        assert_eq!(outcome, AnalysisOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_ci_invocation_and_log_truncation() {
        let dir = project();
        let build_dir = dir.path().join("build");
        fs::create_dir_all(&build_dir).unwrap();
        fs::write(build_dir.join(ANALYSIS_LOG), "stale failure from last week\n").unwrap();

        let p = probe(
            true,
            ToolLocation::Found(PathBuf::from("/usr/bin/run-clang-tidy")),
            Some(PathBuf::from("/sdk")),
        );
        let exec = RecordingExecutor::with_responder(|_| {
            Ok(CommandOutput {
                exit_code: 1,
                stdout: "flow.c:3: warning: magic number\n".to_string(),
                stderr: String::new(),
            })
        });

        let outcome = AnalysisRunner::new(&p, &exec)
            .run(dir.path(), &build_dir, SourceMode::C)
            .await
            .unwrap();

        let report = match outcome {
            AnalysisOutcome::Ran(report) => report,
            other => panic!("expected a run, got {other:?}"),
        };
        assert_eq!(report.return_code, 1);
        assert!(!report.clean());

        let log = fs::read_to_string(&report.log_path).unwrap();
        assert!(log.contains("magic number"));
        assert!(!log.contains("stale"));

        let inv = &exec.invocations()[0];
        assert!(inv.has_arg("-j3"));
        assert!(inv.has_arg(&format!("-p={}", build_dir.display())));
        assert!(inv.has_arg("-extra-arg=-isysroot/sdk"));
        assert!(inv.has_arg("-warnings-as-errors=*"));
        assert!(inv.args.iter().any(|a| a.starts_with("-config-file=")));
        assert!(inv.args.iter().any(|a| a.ends_with("flow.c")));
        assert!(!inv.args.iter().any(|a| a.ends_with("gui.cpp")));
        assert!(inv.env.contains(&("BUILD_DIR".to_string(), build_dir.to_string_lossy().into_owned())));
    }

    #[tokio::test]
    async fn test_local_run_has_no_warnings_as_errors() {
        let dir = project();
        let p = probe(false, ToolLocation::Found(PathBuf::from("run-clang-tidy")), None);
        let exec = RecordingExecutor::new();
        AnalysisRunner::new(&p, &exec)
            .run(dir.path(), &dir.path().join("build"), SourceMode::All)
            .await
            .unwrap();

        let inv = &exec.invocations()[0];
        assert!(!inv.has_arg("-warnings-as-errors=*"));
        assert!(!inv.args.iter().any(|a| a.starts_with("-extra-arg")));
        assert!(inv.args.iter().any(|a| a.ends_with("gui.cpp")));
    }
}
