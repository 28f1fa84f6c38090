//! Workspace root setup and the listing shown before each attempt.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::core::sandbox::PathSandbox;

/// Directories listed but not descended into.
const OPAQUE_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".venv", "target"];

/// Create the workspace root if absent and return a sandbox over it.
pub fn open_workspace(root: &Path) -> Result<PathSandbox> {
    fs::create_dir_all(root).with_context(|| format!("create workspace {}", root.display()))?;
    let canonical =
        fs::canonicalize(root).with_context(|| format!("resolve workspace {}", root.display()))?;
    PathSandbox::new(canonical)
}

/// Recursive, name-sorted listing of the sandbox root.
///
/// Directories carry a trailing `/`. At most `max_entries` lines are listed,
/// followed by a count of the omitted ones.
pub fn workspace_listing(sandbox: &PathSandbox, max_entries: usize) -> Result<String> {
    let mut lines = Vec::new();
    let mut omitted = 0usize;

    let mut walker = WalkDir::new(sandbox.root())
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("walk {}", sandbox.root().display()))?;
        let is_dir = entry.file_type().is_dir();
        if is_dir
            && OPAQUE_DIRS
                .iter()
                .any(|name| entry.file_name() == std::ffi::OsStr::new(name))
        {
            walker.skip_current_dir();
        }

        if lines.len() >= max_entries {
            omitted += 1;
            continue;
        }
        let mut shown = sandbox.display_relative(entry.path());
        if is_dir {
            shown.push('/');
        }
        lines.push(shown);
    }

    if lines.is_empty() {
        return Ok("The workspace is empty.".to_string());
    }
    let mut out = String::from("Current workspace contents:");
    for line in &lines {
        out.push_str("\n- ");
        out.push_str(line);
    }
    if omitted > 0 {
        out.push_str(&format!("\n... {omitted} more entries not shown"));
    }
    Ok(out)
}
