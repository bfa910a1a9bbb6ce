//! Environment probing: CI detection, OS identity, parallelism and toolchain.
//!
//! The probe runs once per invocation and produces an immutable
//! [`ProbeReport`]. Every other component receives what it needs from that
//! report; nothing below this module reads the process environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LaunchError, Result};
use crate::executor::Invocation;

/// Environment variables whose presence marks a CI run.
pub const CI_VARIABLES: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_HOME",
    "TEAMCITY_VERSION",
];

/// Dependency search path that only exists on the Windows CI runners.
const WINDOWS_CI_PREFIX_PATH: &str = "C:/deps/gsl-install;C:/deps/jansson-install;C:/deps/libmodbus";

const HOMEBREW_LLVM: &str = "/opt/homebrew/opt/llvm/bin";

/// Captured process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment (non-UTF-8 entries are dropped).
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Whether any recognised CI variable is set.
    pub fn is_ci(&self) -> bool {
        CI_VARIABLES.iter().any(|var| self.contains(var))
    }

    fn is_github_actions(&self) -> bool {
        self.get("GITHUB_ACTIONS") == Some("true")
    }
}

/// Operating systems the toolchain table knows about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
}

impl HostOs {
    /// Parse an OS identity as reported by Rust (`std::env::consts::OS`),
    /// `uname` or a CI runner (`RUNNER_OS`).
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "linux" | "Linux" => Ok(HostOs::Linux),
            "macos" | "macOS" | "Darwin" | "darwin" => Ok(HostOs::MacOs),
            "windows" | "Windows" => Ok(HostOs::Windows),
            other => Err(LaunchError::UnsupportedOs(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostOs::Linux => "Linux",
            HostOs::MacOs => "macOS",
            HostOs::Windows => "Windows",
        }
    }
}

/// Build-system generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Generator {
    /// `ninja`, preferred whenever it is on PATH
    Ninja,
    /// Classic recursive makefiles
    Make,
}

impl Generator {
    pub fn name(&self) -> &'static str {
        match self {
            Generator::Ninja => "ninja",
            Generator::Make => "make",
        }
    }

    /// Arguments selecting this generator at configure time.
    pub fn configure_args(&self) -> Vec<String> {
        match self {
            Generator::Ninja => vec!["-G".to_string(), "Ninja".to_string()],
            Generator::Make => Vec::new(),
        }
    }

    /// The generator's own build command.
    pub fn build_invocation(&self, parallelism: usize, verbose: bool) -> Invocation {
        match self {
            Generator::Ninja => {
                let inv = Invocation::new("ninja");
                let inv = if verbose { inv.arg("-v") } else { inv };
                inv.args(["-j".to_string(), parallelism.to_string()])
            }
            Generator::Make => {
                let inv = Invocation::new("make").arg(format!("-j{parallelism}"));
                if verbose {
                    inv.arg("VERBOSE=1")
                } else {
                    inv
                }
            }
        }
    }
}

/// Outcome of looking up a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolLocation {
    Found(PathBuf),
    NotFound,
}

impl ToolLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ToolLocation::Found(path) => Some(path),
            ToolLocation::NotFound => None,
        }
    }
}

/// Finds executables by name.
pub trait ToolLocator: Send + Sync {
    fn locate(&self, name: &str) -> ToolLocation;
}

/// Locator that searches `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathLocator;

impl ToolLocator for PathLocator {
    fn locate(&self, name: &str) -> ToolLocation {
        match which::which(name) {
            Ok(path) => ToolLocation::Found(path),
            Err(_) => ToolLocation::NotFound,
        }
    }
}

/// Compilers, generator and host facts for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainProfile {
    /// C compiler handed to the configure step.
    pub c_compiler: PathBuf,

    /// C++ compiler handed to the configure step.
    pub cxx_compiler: PathBuf,

    /// Generator chosen by capability probe.
    pub generator: Generator,

    /// Parallel jobs for compile and analysis.
    pub parallelism: usize,

    /// Running under CI.
    pub is_ci: bool,

    /// Parsed OS identity.
    pub os: HostOs,

    /// OS identity as reported by the host or CI runner.
    pub os_name: String,

    /// Extra dependency search path (pinned CI locations only).
    pub prefix_path: Option<String>,

    /// macOS SDK root, when `xcrun` could report it.
    pub sdk_root: Option<PathBuf>,

    /// Static-analysis cache wiped on rebuild.
    pub analysis_cache_dir: Option<PathBuf>,
}

/// External collaborators found on this host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInventory {
    /// `clang-format`
    pub formatter: ToolLocation,

    /// `run-clang-tidy` driver
    pub analyzer: ToolLocation,
}

/// Pipeline switches read from the environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Run static analysis after compiling.
    pub analysis_enabled: bool,
}

/// Everything the probe learned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeReport {
    pub profile: ToolchainProfile,
    pub tools: ToolInventory,
    pub settings: Settings,
}

/// Derives a [`ProbeReport`] from an environment snapshot and a tool locator.
pub struct EnvironmentProbe<'a> {
    env: &'a EnvSnapshot,
    locator: &'a dyn ToolLocator,
    host_os: String,
    parallelism: Option<usize>,
}

impl<'a> EnvironmentProbe<'a> {
    pub fn new(env: &'a EnvSnapshot, locator: &'a dyn ToolLocator) -> Self {
        Self {
            env,
            locator,
            host_os: std::env::consts::OS.to_string(),
            parallelism: None,
        }
    }

    /// Pretend to run on a different host OS.
    pub fn with_host_os(mut self, os: &str) -> Self {
        self.host_os = os.to_string();
        self
    }

    /// Skip core-count detection and use `jobs`.
    pub fn with_parallelism(mut self, jobs: usize) -> Self {
        self.parallelism = Some(jobs.max(1));
        self
    }

    /// Probe the environment.
    ///
    /// Fails only for an unrecognised OS; every other gap degrades (slow
    /// generator, missing collaborators reported as `NotFound`).
    pub fn probe(&self) -> Result<ProbeReport> {
        let is_ci = self.env.is_ci();

        let os_name = match (self.env.is_github_actions(), self.env.get("RUNNER_OS")) {
            (true, Some(runner_os)) => runner_os.to_string(),
            _ => self.host_os.clone(),
        };
        let os = HostOs::parse(&os_name)?;

        let (c_compiler, cxx_compiler) = compiler_pair(os, is_ci);

        let generator = match self.locator.locate("ninja") {
            ToolLocation::Found(_) => Generator::Ninja,
            ToolLocation::NotFound => {
                debug!("ninja not found, falling back to make");
                Generator::Make
            }
        };

        let parallelism = self.parallelism.unwrap_or_else(|| detect_parallelism(os));

        let prefix_path = if is_ci && os == HostOs::Windows {
            Some(WINDOWS_CI_PREFIX_PATH.to_string())
        } else {
            None
        };

        let sdk_root = if os == HostOs::MacOs {
            detect_sdk_root()
        } else {
            None
        };

        let analysis_cache_dir = self
            .env
            .get("HOME")
            .or_else(|| self.env.get("USERPROFILE"))
            .map(|home| Path::new(home).join(".cache").join("cppcheck"));

        let tools = ToolInventory {
            formatter: self.locator.locate("clang-format"),
            analyzer: self.resolve_analyzer(),
        };

        let settings = Settings {
            analysis_enabled: is_ci || self.env.get("RUN_CLANG_TIDY").unwrap_or("1") == "1",
        };

        info!(
            os = %os.name(),
            ci = is_ci,
            generator = %generator.name(),
            jobs = parallelism,
            "Probed build environment"
        );

        Ok(ProbeReport {
            profile: ToolchainProfile {
                c_compiler,
                cxx_compiler,
                generator,
                parallelism,
                is_ci,
                os,
                os_name,
                prefix_path,
                sdk_root,
                analysis_cache_dir,
            },
            tools,
            settings,
        })
    }

    /// Explicit override, then a driver next to `clang-tidy`, then PATH.
    fn resolve_analyzer(&self) -> ToolLocation {
        if let Some(explicit) = self.env.get("RUN_CLANG_TIDY_BIN") {
            let path = PathBuf::from(explicit);
            if path.exists() {
                return ToolLocation::Found(path);
            }
            warn!(path = %explicit, "RUN_CLANG_TIDY_BIN set but not found");
        }

        if let ToolLocation::Found(clang_tidy) = self.locator.locate("clang-tidy") {
            if let Some(dir) = clang_tidy.parent() {
                for candidate in ["run-clang-tidy", "run-clang-tidy.py", "run-clang-tidy.exe"] {
                    let path = dir.join(candidate);
                    if path.is_file() {
                        return ToolLocation::Found(path);
                    }
                }
            }
        }

        self.locator.locate("run-clang-tidy")
    }
}

fn compiler_pair(os: HostOs, is_ci: bool) -> (PathBuf, PathBuf) {
    match (os, is_ci) {
        (HostOs::Windows, true) => (
            PathBuf::from("C:/deps/llvm-mingw/bin/clang.exe"),
            PathBuf::from("C:/deps/llvm-mingw/bin/clang++.exe"),
        ),
        (HostOs::MacOs, _) => (
            Path::new(HOMEBREW_LLVM).join("clang"),
            Path::new(HOMEBREW_LLVM).join("clang++"),
        ),
        (HostOs::Linux, true) => (
            PathBuf::from("/usr/bin/clang"),
            PathBuf::from("/usr/bin/clang++"),
        ),
        (HostOs::Linux | HostOs::Windows, false) => {
            (PathBuf::from("clang"), PathBuf::from("clang++"))
        }
    }
}

/// Core count: `sysctl` on macOS, the std query elsewhere, 1 as last resort.
pub fn detect_parallelism(os: HostOs) -> usize {
    if os == HostOs::MacOs {
        let sysctl = Command::new("sysctl").args(["-n", "hw.ncpu"]).output();
        if let Ok(out) = sysctl {
            if out.status.success() {
                if let Ok(n) = String::from_utf8_lossy(&out.stdout).trim().parse::<usize>() {
                    if n > 0 {
                        return n;
                    }
                }
            }
        }
    }

    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn detect_sdk_root() -> Option<PathBuf> {
    let out = Command::new("xcrun").arg("--show-sdk-path").output().ok()?;
    if !out.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
