//! Simulation log validation.
//!
//! [`validate`] is a pure function of the log text and the test kind;
//! [`validate_file`] only reads the file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::process::LOG_DIR;

/// Log file the simulator writes below [`LOG_DIR`].
pub const LOG_FILE: &str = "xfe-control-sim-simulation-output.log";

/// Markers a simulator log must contain somewhere.
pub const SIM_MARKERS: &[&str] = &["Program Duration:", "write Duration:"];

/// Text the last content line of a simulator log must contain.
pub const CLOSING_MARKER: &str = "Closing Program";

/// Marker the controller-interface test must log.
pub const DISCON_MARKER: &str = "discon init complete!";

/// Any line containing this is an error line.
pub const ERROR_MARKER: &str = "ERROR";

/// Which contract the log is checked against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Full simulator run.
    Sim,
    /// Controller interface (DISCON) smoke test.
    Discon,
}

impl TestKind {
    pub fn required_markers(&self) -> &'static [&'static str] {
        match self {
            TestKind::Sim => SIM_MARKERS,
            TestKind::Discon => &[DISCON_MARKER],
        }
    }
}

/// Verdict on one log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    /// No violation of any kind.
    pub ok: bool,

    /// Whether the log file existed.
    pub log_found: bool,

    /// Required markers not present anywhere in the log.
    pub missing_markers: BTreeSet<String>,

    /// Offending last content line (`Some("")` for a log with no content).
    pub bad_last_line: Option<String>,

    /// Every line containing [`ERROR_MARKER`], in file order.
    pub error_lines: Vec<String>,
}

impl ValidationReport {
    /// Report for a log that does not exist.
    pub fn missing_log(kind: TestKind) -> Self {
        Self {
            ok: false,
            log_found: false,
            missing_markers: kind
                .required_markers()
                .iter()
                .map(|m| m.to_string())
                .collect(),
            bad_last_line: None,
            error_lines: Vec::new(),
        }
    }

    /// Human-readable description of each violation.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.log_found {
            out.push("Log file not found".to_string());
        }
        for marker in &self.missing_markers {
            out.push(format!("Missing '{marker}' line."));
        }
        if let Some(line) = &self.bad_last_line {
            out.push(format!(
                "Last non-empty line is not '{CLOSING_MARKER}'. Last line was: {line}"
            ));
        }
        for line in &self.error_lines {
            out.push(format!("Error line: {line}"));
        }
        out
    }
}

/// Non-blank lines, in order.
pub fn content_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|line| !line.trim().is_empty()).collect()
}

/// The final non-blank line, if any.
pub fn last_content_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|line| !line.trim().is_empty())
}

/// Check `text` against the contract for `kind`.
pub fn validate(text: &str, kind: TestKind) -> ValidationReport {
    let missing_markers: BTreeSet<String> = kind
        .required_markers()
        .iter()
        .filter(|marker| !text.contains(*marker))
        .map(|marker| marker.to_string())
        .collect();

    let bad_last_line = match kind {
        TestKind::Sim => match last_content_line(text) {
            Some(line) if line.contains(CLOSING_MARKER) => None,
            Some(line) => Some(line.to_string()),
            None => Some(String::new()),
        },
        TestKind::Discon => None,
    };

    let error_lines: Vec<String> = text
        .lines()
        .filter(|line| line.contains(ERROR_MARKER))
        .map(str::to_string)
        .collect();

    ValidationReport {
        ok: missing_markers.is_empty() && bad_last_line.is_none() && error_lines.is_empty(),
        log_found: true,
        missing_markers,
        bad_last_line,
        error_lines,
    }
}

/// Read `path` (lossily decoded) and validate it.
pub fn validate_file(path: &Path, kind: TestKind) -> Result<ValidationReport> {
    match fs::read(path) {
        Ok(bytes) => Ok(validate(&String::from_utf8_lossy(&bytes), kind)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ValidationReport::missing_log(kind)),
        Err(e) => Err(e.into()),
    }
}

/// Simulator log location for a project.
pub fn log_path(project_root: &Path) -> PathBuf {
    project_root.join(LOG_DIR).join(LOG_FILE)
}
