//! Configure + compile coordination.
//!
//! State machine:
//!
//! ```text
//! NOT_CONFIGURED ─(rebuild)─▶ CLEANING ─▶ CONFIGURING ─▶ COMPILING ─▶ DONE
//!        └──(no rebuild, build dir present)──────────────────────────▶ DONE
//! ```
//!
//! Configure and compile failures are terminal; nothing is retried.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::env::ToolchainProfile;
use crate::error::Result;
use crate::executor::{CommandExecutor, Invocation};

/// CMake option toggling the primary executable target.
pub const EXECUTABLE_OPTION: &str = "BUILD_XFE_CONTROL_SIM_EXECUTABLE";

/// What the build is for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// The simulator executable, statically linked.
    PrimaryExecutable,
    /// The shared controller library plus its interface test binary.
    SharedLibraryTest,
}

impl TargetKind {
    /// Name of the binary produced under `executables-out`.
    pub fn binary_name(&self) -> &'static str {
        match self {
            TargetKind::PrimaryExecutable => "xfe_control_sim",
            TargetKind::SharedLibraryTest => "qblade_interface_test",
        }
    }

    pub fn builds_executable(&self) -> bool {
        matches!(self, TargetKind::PrimaryExecutable)
    }

    pub fn builds_shared_libs(&self) -> bool {
        matches!(self, TargetKind::SharedLibraryTest)
    }
}

/// CMake build type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BuildType {
    Debug,
    Release,
}

impl BuildType {
    /// `Release` for the shared-library test and in CI, `Debug` otherwise.
    pub fn select(target: TargetKind, is_ci: bool) -> Self {
        if is_ci || target == TargetKind::SharedLibraryTest {
            BuildType::Release
        } else {
            BuildType::Debug
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Debug => "Debug",
            BuildType::Release => "Release",
        }
    }
}

/// One build invocation's parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRequest {
    /// Source directory handed to the configure step.
    pub project_root: PathBuf,

    /// Build directory (created by the configure step).
    pub build_dir: PathBuf,

    /// Wipe and reconfigure instead of reusing an existing build.
    pub rebuild: bool,

    /// Verbose makefiles and generator output.
    pub verbose: bool,

    /// Build shared instead of static libraries.
    pub build_shared_libs: bool,

    /// Build the primary executable target.
    pub build_executable: bool,

    /// Target the request is for.
    pub target_kind: TargetKind,
}

impl BuildRequest {
    /// Request with the target flags implied by `target_kind`.
    pub fn for_target(
        project_root: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        target_kind: TargetKind,
        rebuild: bool,
        verbose: bool,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            build_dir: build_dir.into(),
            rebuild,
            verbose,
            build_shared_libs: target_kind.builds_shared_libs(),
            build_executable: target_kind.builds_executable(),
            target_kind,
        }
    }
}

/// Phases of the coordinator state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    NotConfigured,
    Cleaning,
    Configuring,
    Compiling,
    Done,
}

/// Outcome of a coordinator run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildResult {
    /// Configure step ran and exited 0.
    pub configured: bool,

    /// Compile step ran and exited 0.
    pub compiled: bool,

    /// Exit code of the last step that ran (0 when reused).
    pub exit_code: i32,

    /// Existing build directory reused without running anything.
    pub reused: bool,

    /// Phases entered, in order.
    pub phases: Vec<BuildPhase>,
}

impl BuildResult {
    /// Whether the pipeline may proceed to execution.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && (self.reused || (self.configured && self.compiled))
    }
}

/// Translates a [`BuildRequest`] into configure and compile steps.
pub struct BuildCoordinator<'a> {
    profile: &'a ToolchainProfile,
    executor: &'a dyn CommandExecutor,
}

impl<'a> BuildCoordinator<'a> {
    pub fn new(profile: &'a ToolchainProfile, executor: &'a dyn CommandExecutor) -> Self {
        Self { profile, executor }
    }

    /// Drive the state machine for `request`.
    pub async fn run(&self, request: &BuildRequest) -> Result<BuildResult> {
        let mut phases = vec![BuildPhase::NotConfigured];

        if !request.rebuild && request.build_dir.exists() {
            info!(build_dir = %request.build_dir.display(), "Reusing existing build");
            phases.push(BuildPhase::Done);
            return Ok(BuildResult {
                configured: false,
                compiled: false,
                exit_code: 0,
                reused: true,
                phases,
            });
        }

        if request.rebuild {
            phases.push(BuildPhase::Cleaning);
            self.clean(request)?;
        }

        phases.push(BuildPhase::Configuring);
        fs::create_dir_all(&request.build_dir)?;
        info!("Configuring with CMake...");
        let configure = self
            .executor
            .execute(&self.configure_invocation(request))
            .await?;
        if !configure.success() {
            error!(exit_code = configure.exit_code, "CMake configuration failed");
            return Ok(BuildResult {
                configured: false,
                compiled: false,
                exit_code: configure.exit_code,
                reused: false,
                phases,
            });
        }

        phases.push(BuildPhase::Compiling);
        info!(jobs = self.profile.parallelism, "Building...");
        let compile = self
            .executor
            .execute(&self.compile_invocation(request))
            .await?;
        if !compile.success() {
            error!(exit_code = compile.exit_code, "Compilation failed");
            return Ok(BuildResult {
                configured: true,
                compiled: false,
                exit_code: compile.exit_code,
                reused: false,
                phases,
            });
        }

        phases.push(BuildPhase::Done);
        Ok(BuildResult {
            configured: true,
            compiled: true,
            exit_code: 0,
            reused: false,
            phases,
        })
    }

    /// Remove the build directory and the analysis cache, ignoring absence.
    fn clean(&self, request: &BuildRequest) -> Result<()> {
        info!(build_dir = %request.build_dir.display(), "Removing build directory");
        remove_dir_if_exists(&request.build_dir)?;
        if let Some(cache) = &self.profile.analysis_cache_dir {
            remove_dir_if_exists(cache)?;
        }
        Ok(())
    }

    /// The configure command for `request`.
    pub fn configure_invocation(&self, request: &BuildRequest) -> Invocation {
        let profile = self.profile;
        let on_off = |flag: bool| if flag { "ON" } else { "OFF" };
        let build_type = BuildType::select(request.target_kind, profile.is_ci);

        let mut inv = Invocation::new("cmake")
            .args(profile.generator.configure_args())
            .arg("-B")
            .arg(request.build_dir.to_string_lossy())
            .arg("-S")
            .arg(request.project_root.to_string_lossy())
            .arg(format!("-DCMAKE_BUILD_TYPE={}", build_type.as_str()))
            .arg(format!("-DCMAKE_VERBOSE_MAKEFILE={}", on_off(request.verbose)))
            .arg(format!("-DCMAKE_C_COMPILER={}", profile.c_compiler.display()))
            .arg(format!("-DCMAKE_CXX_COMPILER={}", profile.cxx_compiler.display()))
            .arg("-DCMAKE_EXPORT_COMPILE_COMMANDS=ON")
            .arg(format!("-D{EXECUTABLE_OPTION}={}", on_off(request.build_executable)))
            .arg(format!("-DBUILD_SHARED_LIBS={}", on_off(request.build_shared_libs)));

        if let Some(prefix) = &profile.prefix_path {
            inv = inv.arg(format!("-DCMAKE_PREFIX_PATH={prefix}"));
        }

        inv.current_dir(&request.project_root).inherit_output()
    }

    /// The generator's build command for `request`.
    pub fn compile_invocation(&self, request: &BuildRequest) -> Invocation {
        self.profile
            .generator
            .build_invocation(self.profile.parallelism, request.verbose)
            .current_dir(&request.build_dir)
            .inherit_output()
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
