//! Source file discovery shared by the formatter and the analyzer.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

/// Files below `root` whose extension is in `extensions`, in stable order.
///
/// Directories whose name is in `prune` are skipped entirely, at any depth.
pub fn discover(root: &Path, extensions: &[&str], prune: &[&str]) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !prune.iter().any(|p| *p == name)
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.contains(&ext))
            .unwrap_or(false);
        if matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
