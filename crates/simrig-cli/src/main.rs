//! simrig launcher CLI
//!
//! The `launch-tests` command builds, runs and validates the simulator.
//!
//! ## Commands
//!
//! - `xfe_control_sim`: Standalone build + run of the simulator
//! - `discon`: Standalone build + run of the controller-interface test
//! - `local_xfe_control_sim`: Build + run from the main repository
//! - `sim_example_copy_test`: Rehearse the simulator in a sandbox copy
//! - `sim_example_copy_test_discon`: Rehearse the interface test in a sandbox copy
//! - `format` / `analyze`: Run one collaborator on its own

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use simrig_ci::pipeline::absolute;
use simrig_ci::{
    git, EnvSnapshot, EnvironmentProbe, LaunchError, LaunchReport, Launcher, PathLocator,
    SourceMode, StageStatus, TargetKind, TestKind,
};
use tracing::{error, Level};

#[derive(Parser)]
#[command(name = "launch-tests")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, run and validate the xfe control simulator", long_about = None)]
struct Cli {
    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Write the run report as JSON to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BuildArgs {
    /// `1` wipes the build directory and reconfigures, `0` reuses it
    #[arg(default_value = "0", value_parser = parse_rebuild, action = ArgAction::Set)]
    rebuild: bool,

    /// Verbose build output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct StandaloneArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Build directory name
    #[arg(long, default_value = "build")]
    build_dir: String,

    /// Project to build (default: current directory)
    #[arg(long)]
    project_root: Option<PathBuf>,
}

#[derive(Args)]
struct RepoArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Subdirectory that is synced and copy-tested
    #[arg(long, default_value = "sim_example")]
    subdir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run the simulator in a standalone project
    #[command(name = "xfe_control_sim")]
    XfeControlSim(StandaloneArgs),

    /// Build and run the controller-interface test in a standalone project
    #[command(name = "discon")]
    Discon(StandaloneArgs),

    /// Build and run the simulator from the main repository
    #[command(name = "local_xfe_control_sim")]
    LocalXfeControlSim(RepoArgs),

    /// Copy the subdirectory to a sandbox and test the simulator there
    #[command(name = "sim_example_copy_test")]
    SimExampleCopyTest(RepoArgs),

    /// Copy the subdirectory to a sandbox and test the controller interface there
    #[command(name = "sim_example_copy_test_discon")]
    SimExampleCopyTestDiscon(RepoArgs),

    /// Run clang-format over the project sources
    Format {
        /// Only check; fail when any file needs formatting
        #[arg(long)]
        check: bool,

        /// Project root (default: current directory)
        #[arg(long, env = "PROJECT_ROOT")]
        project_root: Option<PathBuf>,
    },

    /// Run clang-tidy against an existing build
    Analyze {
        /// Sources to analyse: c, cpp, both or all
        #[arg(default_value = "all")]
        mode: SourceMode,

        /// Project root (default: current directory)
        #[arg(long, env = "PROJECT_ROOT")]
        project_root: Option<PathBuf>,

        /// Build directory holding compile_commands.json (default: <project_root>/build)
        #[arg(long, env = "BUILD_DIR")]
        build_dir: Option<PathBuf>,
    },
}

fn parse_rebuild(value: &str) -> std::result::Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("rebuild must be 0 or 1, got `{other}`")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::XfeControlSim(args) | Commands::Discon(args) => args.build.verbose,
        Commands::LocalXfeControlSim(args)
        | Commands::SimExampleCopyTest(args)
        | Commands::SimExampleCopyTestDiscon(args) => args.build.verbose,
        _ => false,
    };
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    simrig_ci::init_tracing(cli.json, level);

    let report = match dispatch(cli.command).await {
        Ok(report) => report,
        Err(e) => {
            let code = match e.downcast_ref::<LaunchError>() {
                Some(launch) => launch.exit_code(),
                None => 1,
            };
            error!("{e:#}");
            std::process::exit(code);
        }
    };

    print_summary(&report);

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if report.exit_code != 0 {
        std::process::exit(report.exit_code);
    }
    Ok(())
}

async fn dispatch(command: Commands) -> Result<LaunchReport> {
    let env = EnvSnapshot::from_process();
    let probe = EnvironmentProbe::new(&env, &PathLocator).probe()?;
    let launcher = Launcher::system(probe);

    let report = match command {
        Commands::XfeControlSim(args) => {
            cmd_standalone(&launcher, args, TargetKind::PrimaryExecutable).await?
        }
        Commands::Discon(args) => {
            cmd_standalone(&launcher, args, TargetKind::SharedLibraryTest).await?
        }
        Commands::LocalXfeControlSim(args) => {
            let repo_root = require_repo_root(&launcher, "local_xfe_control_sim").await?;
            launcher
                .run_main_repo(&repo_root, &args.subdir, args.build.rebuild, args.build.verbose)
                .await?
        }
        Commands::SimExampleCopyTest(args) => {
            cmd_copy_test(&launcher, args, TestKind::Sim, "sim_example_copy_test").await?
        }
        Commands::SimExampleCopyTestDiscon(args) => {
            cmd_copy_test(&launcher, args, TestKind::Discon, "sim_example_copy_test_discon").await?
        }
        Commands::Format {
            check,
            project_root,
        } => {
            let root = resolve_root(project_root)?;
            launcher.run_format(&root, check).await?
        }
        Commands::Analyze {
            mode,
            project_root,
            build_dir,
        } => {
            let root = resolve_root(project_root)?;
            let build_dir = match build_dir {
                Some(dir) => absolute(&dir)?,
                None => root.join("build"),
            };
            launcher.run_analysis(&root, &build_dir, mode).await?
        }
    };

    Ok(report)
}

async fn cmd_standalone(
    launcher: &Launcher,
    args: StandaloneArgs,
    target: TargetKind,
) -> Result<LaunchReport> {
    let project_root = resolve_root(args.project_root)?;
    let report = launcher
        .run_standalone(
            &project_root,
            &args.build_dir,
            target,
            args.build.rebuild,
            args.build.verbose,
        )
        .await?;
    Ok(report)
}

async fn cmd_copy_test(
    launcher: &Launcher,
    args: RepoArgs,
    kind: TestKind,
    command: &str,
) -> Result<LaunchReport> {
    let repo_root = require_repo_root(launcher, command).await?;
    let launcher_exe =
        std::env::current_exe().context("Failed to locate the launch-tests executable")?;
    let report = launcher
        .run_copy_test(&repo_root, &args.subdir, kind, args.build.rebuild, &launcher_exe)
        .await?;
    Ok(report)
}

async fn require_repo_root(launcher: &Launcher, command: &str) -> Result<PathBuf> {
    let root = git::find_repo_root(launcher.executor.as_ref(), None).await?;
    match root {
        Some(root) => Ok(root),
        None => Err(LaunchError::NotInGitRepository {
            command: command.to_string(),
        }
        .into()),
    }
}

/// Project root as an absolute path; children run with other working dirs.
fn resolve_root(project_root: Option<PathBuf>) -> Result<PathBuf> {
    match project_root {
        Some(root) => Ok(absolute(&root)?),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

fn print_summary(report: &LaunchReport) {
    println!();
    println!("Run ID: {}", report.run_id);
    println!(
        "Status: {}",
        if report.success() { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for stage in &report.stages {
        let (mark, detail) = match &stage.status {
            StageStatus::Passed => ("✓", String::new()),
            StageStatus::Failed { exit_code } => ("✗", format!(", exit code: {exit_code}")),
            StageStatus::Skipped { reason } => ("-", format!(", skipped: {reason}")),
        };
        println!(
            "  {} {} ({}ms{})",
            mark,
            stage.stage.name(),
            stage.duration_ms,
            detail
        );
    }

    if let Some(sandbox) = &report.sandbox {
        println!();
        println!("Sandbox: {} ({:?})", sandbox.temp_dir.display(), sandbox.disposition);
    }

    println!();
    println!(
        "Summary: {}/{} stages passed, exit code {}",
        report.passed_count(),
        report.stages.len(),
        report.exit_code
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_flag_parsing() {
        assert_eq!(parse_rebuild("0"), Ok(false));
        assert_eq!(parse_rebuild("1"), Ok(true));
        assert!(parse_rebuild("yes").is_err());
    }

    #[test]
    fn test_standalone_command_line() {
        let cli = Cli::try_parse_from([
            "launch-tests",
            "xfe_control_sim",
            "1",
            "--project-root",
            "/tmp/sim_example_test",
        ])
        .unwrap();
        match cli.command {
            Commands::XfeControlSim(args) => {
                assert!(args.build.rebuild);
                assert_eq!(args.build_dir, "build");
                assert_eq!(args.project_root, Some(PathBuf::from("/tmp/sim_example_test")));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_copy_test_defaults() {
        let cli = Cli::try_parse_from(["launch-tests", "sim_example_copy_test_discon"]).unwrap();
        match cli.command {
            Commands::SimExampleCopyTestDiscon(args) => {
                assert!(!args.build.rebuild);
                assert_eq!(args.subdir, "sim_example");
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_analyze_defaults_to_all_sources() {
        let cli = Cli::try_parse_from(["launch-tests", "analyze", "--project-root", "/p"]).unwrap();
        match cli.command {
            Commands::Analyze { mode, .. } => assert_eq!(mode, SourceMode::All),
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_relative_project_root_is_made_absolute() {
        let root = resolve_root(Some(PathBuf::from("sim_example_test"))).unwrap();
        assert!(root.is_absolute());
        assert_eq!(root, std::env::current_dir().unwrap().join("sim_example_test"));

        let fixed = resolve_root(Some(PathBuf::from("/tmp/sim_example_test"))).unwrap();
        assert_eq!(fixed, PathBuf::from("/tmp/sim_example_test"));
    }

    #[test]
    fn test_analyze_mode_alias() {
        let cli = Cli::try_parse_from(["launch-tests", "analyze", "both", "--project-root", "/p"]).unwrap();
        match cli.command {
            Commands::Analyze { mode, .. } => assert_eq!(mode, SourceMode::All),
            _ => panic!("wrong subcommand"),
        }
    }
}
