//! Run report: what each stage did and how the run ended.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sandbox::SandboxOutcome;
use crate::validate::ValidationReport;

/// Entry point a run went through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    Standalone,
    MainRepo,
    CopyTest,
    Format,
    Analyze,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Sync,
    Format,
    Build,
    Analysis,
    Execute,
    Validate,
    Sandbox,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Sync => "sync",
            Stage::Format => "format",
            Stage::Build => "build",
            Stage::Analysis => "analysis",
            Stage::Execute => "execute",
            Stage::Validate => "validate",
            Stage::Sandbox => "sandbox",
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed { exit_code: i32 },
    Skipped { reason: String },
}

/// One stage of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,

    #[serde(flatten)]
    pub status: StageStatus,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageRecord {
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Passed
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, StageStatus::Failed { .. })
    }
}

/// Result of a complete launcher run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchReport {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: LaunchMode,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Stages in the order they ran.
    pub stages: Vec<StageRecord>,

    /// Log validation verdict, when a log was validated.
    pub validation: Option<ValidationReport>,

    /// Sandbox outcome, for copy tests.
    pub sandbox: Option<SandboxOutcome>,

    /// Process exit code for this run.
    pub exit_code: i32,
}

impl LaunchReport {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.failed()).count()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Accumulates stage records while a run is in progress.
pub(crate) struct ReportBuilder {
    run_id: String,
    mode: LaunchMode,
    started_at: DateTime<Utc>,
    start: Instant,
    stage_start: Instant,
    stages: Vec<StageRecord>,
    validation: Option<ValidationReport>,
    sandbox: Option<SandboxOutcome>,
}

impl ReportBuilder {
    pub(crate) fn start(mode: LaunchMode) -> Self {
        let now = Instant::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            mode,
            started_at: Utc::now(),
            start: now,
            stage_start: now,
            stages: Vec::new(),
            validation: None,
            sandbox: None,
        }
    }

    /// Mark the start of the next stage.
    pub(crate) fn begin(&mut self) {
        self.stage_start = Instant::now();
    }

    /// Record the stage that began at the last [`ReportBuilder::begin`].
    pub(crate) fn record(&mut self, stage: Stage, status: StageStatus) {
        self.stages.push(StageRecord {
            stage,
            status,
            duration_ms: self.stage_start.elapsed().as_millis() as u64,
        });
    }

    pub(crate) fn validation(&mut self, report: ValidationReport) {
        self.validation = Some(report);
    }

    pub(crate) fn sandbox(&mut self, outcome: SandboxOutcome) {
        self.sandbox = Some(outcome);
    }

    pub(crate) fn finish(self, exit_code: i32) -> LaunchReport {
        LaunchReport {
            run_id: self.run_id,
            mode: self.mode,
            started_at: self.started_at,
            duration_ms: self.start.elapsed().as_millis() as u64,
            stages: self.stages,
            validation: self.validation,
            sandbox: self.sandbox,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut builder = ReportBuilder::start(LaunchMode::Standalone);
        builder.begin();
        builder.record(Stage::Format, StageStatus::Skipped { reason: "no clang-format".to_string() });
        builder.record(Stage::Build, StageStatus::Passed);
        builder.record(Stage::Execute, StageStatus::Failed { exit_code: 3 });
        let report = builder.finish(3);

        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.success());
        assert!(report.stage(Stage::Build).unwrap().passed());
        assert!(report.stage(Stage::Sandbox).is_none());
        assert!(Uuid::parse_str(&report.run_id).is_ok());
    }

    #[test]
    fn test_stage_record_json_shape() {
        let record = StageRecord {
            stage: Stage::Analysis,
            status: StageStatus::Failed { exit_code: 1 },
            duration_ms: 12,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["stage"], "analysis");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["exit_code"], 1);
    }
}
