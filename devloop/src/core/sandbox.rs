//! Path confinement for every tool that touches the workspace.
//!
//! [`PathSandbox::resolve`] is total: malformed or escaping input degrades to a
//! path under the root instead of failing, so tool implementations never see a
//! path outside the workspace.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// A confined directory. All resolved paths are the root or its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Build a sandbox rooted at `root`, made absolute and lexically normalized.
    ///
    /// Does not touch the filesystem beyond reading the current directory for
    /// relative roots.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let absolute = std::path::absolute(root)
            .with_context(|| format!("make sandbox root absolute {}", root.display()))?;
        Ok(Self {
            root: normalize_lexically(&absolute),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a requested path onto the sandbox.
    ///
    /// Rules, in order:
    /// - `""`, `"."` and `"./"` are the root itself.
    /// - An absolute path already under the root is taken relative to it.
    /// - `..`, `.` and empty segments are dropped; `/` and `\` both separate.
    /// - No remaining segments means the root.
    /// - The joined result must still be under the root; otherwise the root
    ///   joined with the final segment's base name is used.
    pub fn resolve(&self, requested: &str) -> PathBuf {
        if matches!(requested, "" | "." | "./") {
            return self.root.clone();
        }

        let relative = self.strip_root(requested);
        let segments: Vec<&str> = relative
            .split(['/', '\\'])
            .filter(|segment| !matches!(*segment, "" | "." | ".."))
            .collect();

        let Some(last) = segments.last() else {
            return self.root.clone();
        };

        let mut joined = self.root.clone();
        for segment in &segments {
            joined.push(segment);
        }

        if self.contains(&joined) {
            return joined;
        }

        match Path::new(last).file_name() {
            Some(base) if self.contains(&self.root.join(base)) => self.root.join(base),
            _ => self.root.clone(),
        }
    }

    /// Render `path` relative to the root with `/` separators (`.` for the root).
    pub fn display_relative(&self, path: &Path) -> String {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return path.display().to_string();
        };
        let parts: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    fn strip_root<'a>(&self, requested: &'a str) -> &'a str {
        let path = Path::new(requested);
        if !path.is_absolute() {
            return requested;
        }
        match path.strip_prefix(&self.root) {
            Ok(rest) => rest.to_str().unwrap_or(requested),
            Err(_) => requested,
        }
    }

    /// Lexical containment: under the root and free of parent/prefix components.
    fn contains(&self, path: &Path) -> bool {
        let Ok(rest) = path.strip_prefix(&self.root) else {
            return false;
        };
        rest.components()
            .all(|component| matches!(component, Component::Normal(_)))
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
