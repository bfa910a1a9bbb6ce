//! Repository root discovery.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{LaunchError, Result};
use crate::executor::{CommandExecutor, Invocation};

/// Top level of the git checkout containing `cwd`.
///
/// `Ok(None)` when `cwd` is not inside a repository; `Err(ToolNotFound)` when
/// git itself cannot be started.
pub async fn find_repo_root(
    executor: &dyn CommandExecutor,
    cwd: Option<&std::path::Path>,
) -> Result<Option<PathBuf>> {
    let mut inv = Invocation::new("git").args(["rev-parse", "--show-toplevel"]);
    if let Some(dir) = cwd {
        inv = inv.current_dir(dir);
    }

    let out = match executor.execute(&inv).await {
        Ok(out) => out,
        Err(LaunchError::Spawn { .. }) => return Err(LaunchError::ToolNotFound("git".to_string())),
        Err(e) => return Err(e),
    };

    if !out.success() {
        debug!(stderr = %out.stderr.trim(), "Not inside a git repository");
        return Ok(None);
    }

    let root = out.stdout.trim();
    if root.is_empty() {
        Ok(None)
    } else {
        Ok(Some(PathBuf::from(root)))
    }
}
