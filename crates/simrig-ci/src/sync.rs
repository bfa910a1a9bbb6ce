//! Keeps a dependent subdirectory's copy of the support files current.
//!
//! A subtree copied into a sandbox must carry the formatter and analyzer
//! configuration it would otherwise inherit from the repository root.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Support files copied from the repository root into the subdirectory.
pub const SUPPORT_FILES: &[&str] = &[".clang-format", ".clang-tidy"];

/// What happened to one support file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileSync {
    Copied,
    SourceMissing,
}

/// Result of a synchronisation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// CI trees carry pinned tooling; nothing was touched.
    SkippedInCi,
    /// Destination directory absent; nothing was touched.
    DestinationMissing(PathBuf),
    /// Per-file results, in [`SUPPORT_FILES`] order.
    Synced(Vec<(String, FileSync)>),
}

/// Copy [`SUPPORT_FILES`] from `repo_root` into `repo_root/<subdir>`.
///
/// Existing destination files are overwritten; nothing else in the
/// destination is removed.
pub fn sync_support_files(repo_root: &Path, subdir: &str, is_ci: bool) -> Result<SyncOutcome> {
    if is_ci {
        info!("Not syncing support files since we are in CI");
        return Ok(SyncOutcome::SkippedInCi);
    }

    let dest = repo_root.join(subdir);
    if !dest.is_dir() {
        warn!(dest = %dest.display(), "Destination directory not found; not syncing");
        return Ok(SyncOutcome::DestinationMissing(dest));
    }

    info!(subdir, "Syncing support files");
    let mut results = Vec::with_capacity(SUPPORT_FILES.len());
    for name in SUPPORT_FILES {
        let source = repo_root.join(name);
        let status = if source.is_file() {
            fs::copy(&source, dest.join(name))?;
            info!(file = name, "Copied");
            FileSync::Copied
        } else {
            warn!(file = name, "Skipped (not found)");
            FileSync::SourceMissing
        };
        results.push((name.to_string(), status));
    }

    Ok(SyncOutcome::Synced(results))
}
