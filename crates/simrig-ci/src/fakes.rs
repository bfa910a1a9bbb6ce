//! In-memory fakes for the process and tool-lookup seams (testing only)
//!
//! Provides `RecordingExecutor` and `StaticLocator`, which satisfy the
//! `CommandExecutor` and `ToolLocator` contracts without touching PATH or
//! starting processes.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::env::{ToolLocation, ToolLocator};
use crate::error::Result;
use crate::executor::{CommandExecutor, CommandOutput, Invocation};

// ---------------------------------------------------------------------------
// RecordingExecutor
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&Invocation) -> Result<CommandOutput> + Send + Sync>;

/// Executor that records every invocation and answers from a responder.
///
/// The responder runs at call time, so it can observe or modify the
/// filesystem exactly when the real child process would have.
pub struct RecordingExecutor {
    calls: Mutex<Vec<Invocation>>,
    responder: Responder,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    /// Every invocation succeeds with empty output.
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(CommandOutput::ok()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// All invocations so far, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Program names of all invocations, in call order.
    pub fn programs(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.program).collect()
    }

    /// Invocations whose program file name is exactly `name`.
    pub fn calls_to(&self, name: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| Path::new(&i.program).file_name() == Some(OsStr::new(name)))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        (self.responder)(invocation)
    }
}

// ---------------------------------------------------------------------------
// StaticLocator
// ---------------------------------------------------------------------------

/// Tool locator backed by a fixed name → path table.
#[derive(Debug, Default, Clone)]
pub struct StaticLocator {
    tools: BTreeMap<String, PathBuf>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(name.to_string(), path.into());
        self
    }
}

impl ToolLocator for StaticLocator {
    fn locate(&self, name: &str) -> ToolLocation {
        match self.tools.get(name) {
            Some(path) => ToolLocation::Found(path.clone()),
            None => ToolLocation::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_executor_records_in_order() {
        let exec = RecordingExecutor::new();
        exec.execute(&Invocation::new("cmake")).await.unwrap();
        exec.execute(&Invocation::new("/usr/bin/ninja")).await.unwrap();

        assert_eq!(exec.programs(), vec!["cmake", "/usr/bin/ninja"]);
        assert_eq!(exec.calls_to("ninja").len(), 1);
        assert_eq!(exec.call_count(), 2);
    }

    #[tokio::test]
    async fn test_calls_to_matches_whole_file_name() {
        let exec = RecordingExecutor::new();
        exec.execute(&Invocation::new("/usr/bin/cmake")).await.unwrap();
        exec.execute(&Invocation::new("make")).await.unwrap();
        exec.execute(&Invocation::new("/usr/bin/make")).await.unwrap();

        assert_eq!(exec.calls_to("make").len(), 2);
        assert_eq!(exec.calls_to("cmake").len(), 1);
        assert!(exec.calls_to("ake").is_empty());
    }

    #[tokio::test]
    async fn test_responder_controls_exit_code() {
        let exec = RecordingExecutor::with_responder(|inv| {
            Ok(CommandOutput::with_code(if inv.program == "make" { 2 } else { 0 }))
        });
        let out = exec.execute(&Invocation::new("make")).await.unwrap();
        assert_eq!(out.exit_code, 2);
    }

    #[test]
    fn test_static_locator() {
        let locator = StaticLocator::new().with_tool("ninja", "/usr/bin/ninja");
        assert_eq!(
            locator.locate("ninja"),
            ToolLocation::Found(PathBuf::from("/usr/bin/ninja"))
        );
        assert_eq!(locator.locate("make"), ToolLocation::NotFound);
    }
}
