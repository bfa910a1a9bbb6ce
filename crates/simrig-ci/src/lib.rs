//! simrig CI - build, run and validate a native simulation project
//!
//! Provides a launcher that:
//! - Probes the host toolchain once (compilers, generator, parallelism)
//! - Configures and compiles through CMake, reusing builds when asked to
//! - Runs the formatter and static analyzer as advisory stages
//! - Executes the simulator and validates the log it writes
//! - Rehearses the whole pipeline inside a disposable sandbox copy

pub mod analysis;
pub mod build;
pub mod env;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod formatter;
pub mod git;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod sandbox;
pub mod sources;
pub mod sync;
pub mod telemetry;
pub mod validate;

// Re-export key types
pub use analysis::{AnalysisOutcome, AnalysisReport, AnalysisRunner, SourceMode};
pub use build::{BuildCoordinator, BuildPhase, BuildRequest, BuildResult, BuildType, TargetKind};
pub use env::{EnvSnapshot, EnvironmentProbe, PathLocator, ProbeReport, ToolLocation, ToolchainProfile};
pub use error::{LaunchError, Result};
pub use executor::{CommandExecutor, CommandOutput, Invocation, SystemExecutor};
pub use pipeline::Launcher;
pub use process::ExecutionRecord;
pub use report::{LaunchMode, LaunchReport, Stage, StageRecord, StageStatus};
pub use sandbox::{SandboxDisposition, SandboxOutcome, SandboxSession};
pub use sync::SyncOutcome;
pub use telemetry::init_tracing;
pub use validate::{TestKind, ValidationReport};
