//! File and directory tools. Every path goes through [`PathSandbox::resolve`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::marker::replace_between;
use crate::core::sandbox::PathSandbox;
use crate::tools::{ParamKind, ParamSpec, Tool, ToolError, ToolSpec, str_arg};

/// The six filesystem tools bound to one sandbox.
pub fn standard_fs_tools(sandbox: &PathSandbox) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ReadFile::new(sandbox.clone())),
        Box::new(WriteFile::new(sandbox.clone())),
        Box::new(CreateFile::new(sandbox.clone())),
        Box::new(CreateDirectory::new(sandbox.clone())),
        Box::new(ListDirectory::new(sandbox.clone())),
        Box::new(EditFile::new(sandbox.clone())),
    ]
}

/// A requested path after confinement, with its display form.
struct Target {
    path: PathBuf,
    shown: String,
}

impl Target {
    fn resolve(sandbox: &PathSandbox, args: &Map<String, Value>) -> Self {
        let requested = str_arg(args, "path").unwrap_or_default();
        let path = sandbox.resolve(requested);
        let shown = sandbox.display_relative(&path);
        Self { path, shown }
    }

    fn io_error(&self, err: &std::io::Error) -> ToolError {
        ToolError::io(self.shown.clone(), err)
    }
}

/// Reject targets without a file-name component.
fn require_file_name(
    sandbox: &PathSandbox,
    args: &Map<String, Value>,
    target: &Target,
) -> Result<(), ToolError> {
    let requested = str_arg(args, "path").unwrap_or_default();
    let reason = if target.path == sandbox.root() {
        Some("path must include a file name")
    } else if requested.ends_with(['/', '\\']) {
        Some("path ends with a separator")
    } else if target.path.is_dir() {
        Some("path is an existing directory")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ToolError::InvalidPath {
            path: requested.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn ensure_parent(target: &Target) -> Result<(), ToolError> {
    if let Some(parent) = target.path.parent() {
        fs::create_dir_all(parent).map_err(|err| target.io_error(&err))?;
    }
    Ok(())
}

fn path_param(description: &'static str) -> ParamSpec {
    ParamSpec::required("path", ParamKind::String, description)
}

pub struct ReadFile {
    sandbox: PathSandbox,
}

impl ReadFile {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

impl Tool for ReadFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file",
            description: "Read the contents of a file. Supports nested directories (e.g. 'src/utils/helper.py').",
            params: vec![path_param(
                "Path to the file to read, can include subdirectories.",
            )],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let target = Target::resolve(&self.sandbox, args);
        if target.path.is_dir() {
            return Err(ToolError::InvalidPath {
                path: target.shown,
                reason: "path is a directory".to_string(),
            });
        }
        match fs::read_to_string(&target.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Ok(format!("File '{}' does not exist.", target.shown))
            }
            Err(err) => Err(target.io_error(&err)),
        }
    }
}

pub struct WriteFile {
    sandbox: PathSandbox,
}

impl WriteFile {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

impl Tool for WriteFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file",
            description: "Write content to a file, replacing it if it exists. Parent directories are created as needed.",
            params: vec![
                path_param("Path to the file to write, must include a file name."),
                ParamSpec::required("content", ParamKind::String, "Content to write to the file."),
            ],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let target = Target::resolve(&self.sandbox, args);
        require_file_name(&self.sandbox, args, &target)?;
        ensure_parent(&target)?;
        let content = str_arg(args, "content").unwrap_or_default();
        fs::write(&target.path, content).map_err(|err| target.io_error(&err))?;
        debug!(path = %target.shown, bytes = content.len(), "wrote file");
        Ok(format!("Successfully wrote to {}", target.shown))
    }
}

pub struct CreateFile {
    sandbox: PathSandbox,
}

impl CreateFile {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

impl Tool for CreateFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_file",
            description: "Create a new file with the given content. Fails if the file already exists; use write_file or edit_file to change existing files.",
            params: vec![
                path_param("Path to the file to create, must include a file name."),
                ParamSpec::required(
                    "content",
                    ParamKind::String,
                    "Content of the newly created file.",
                ),
            ],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let target = Target::resolve(&self.sandbox, args);
        if target.path.exists() && target.path != self.sandbox.root() {
            return Err(ToolError::AlreadyExists { path: target.shown });
        }
        require_file_name(&self.sandbox, args, &target)?;
        ensure_parent(&target)?;
        let content = str_arg(args, "content").unwrap_or_default();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target.path)
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => ToolError::AlreadyExists {
                    path: target.shown.clone(),
                },
                _ => target.io_error(&err),
            })?;
        std::io::Write::write_all(&mut file, content.as_bytes())
            .map_err(|err| target.io_error(&err))?;
        Ok(format!("Successfully created file '{}'.", target.shown))
    }
}

pub struct CreateDirectory {
    sandbox: PathSandbox,
}

impl CreateDirectory {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }

    /// First existing non-directory between the root (exclusive) and `path` (inclusive).
    fn blocking_file(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(self.sandbox.root()).ok()?;
        let mut current = self.sandbox.root().to_path_buf();
        for component in relative.components() {
            current.push(component);
            if current.exists() && !current.is_dir() {
                return Some(current);
            }
        }
        None
    }
}

impl Tool for CreateDirectory {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_directory",
            description: "Create a directory, including missing parents (e.g. 'src/utils'). Succeeds if it already exists.",
            params: vec![path_param(
                "Path to the directory to create, can include nested directories.",
            )],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let target = Target::resolve(&self.sandbox, args);
        if target.path.is_dir() {
            return Ok(format!("Directory '{}' already exists.", target.shown));
        }
        if let Some(blocker) = self.blocking_file(&target.path) {
            if blocker == target.path {
                return Err(ToolError::AlreadyExists { path: target.shown });
            }
            return Err(ToolError::NotADirectory {
                path: self.sandbox.display_relative(&blocker),
            });
        }
        fs::create_dir_all(&target.path).map_err(|err| target.io_error(&err))?;
        Ok(format!("Successfully created directory '{}'.", target.shown))
    }
}

pub struct ListDirectory {
    sandbox: PathSandbox,
}

impl ListDirectory {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

impl Tool for ListDirectory {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_directory",
            description: "List the entries of a directory (e.g. 'src/utils'), sorted by name.",
            params: vec![path_param(
                "Path to the directory to list, '.' for the project root.",
            )],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let target = Target::resolve(&self.sandbox, args);
        if !target.path.exists() {
            return Err(ToolError::NotFound { path: target.shown });
        }
        if !target.path.is_dir() {
            return Err(ToolError::NotADirectory { path: target.shown });
        }

        let mut entries: Vec<(String, bool)> = Vec::new();
        for entry in fs::read_dir(&target.path).map_err(|err| target.io_error(&err))? {
            let entry = entry.map_err(|err| target.io_error(&err))?;
            let is_dir = entry.path().is_dir();
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        if entries.is_empty() {
            return Ok(format!("Directory '{}' is empty.", target.shown));
        }
        entries.sort();

        let mut out = format!("Contents of directory '{}':", target.shown);
        for (name, is_dir) in entries {
            let tag = if is_dir { "[DIR] " } else { "[FILE]" };
            out.push('\n');
            out.push_str(tag);
            out.push(' ');
            out.push_str(&name);
        }
        Ok(out)
    }
}

pub struct EditFile {
    sandbox: PathSandbox,
}

impl EditFile {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

impl Tool for EditFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file",
            description: "Replace the text between a begin marker and the next end marker in a file. Read the file first and pick markers that occur exactly once.",
            params: vec![
                path_param("Path to the file to edit."),
                ParamSpec::required(
                    "begin_marker",
                    ParamKind::String,
                    "Unique text marking the start of the section to edit.",
                ),
                ParamSpec::required(
                    "end_marker",
                    ParamKind::String,
                    "Unique text marking the end of the section to edit.",
                ),
                ParamSpec::required(
                    "new_content",
                    ParamKind::String,
                    "New content to insert between the markers.",
                ),
            ],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let target = Target::resolve(&self.sandbox, args);
        if !target.path.is_file() {
            return Err(ToolError::NotFound { path: target.shown });
        }
        let text = fs::read_to_string(&target.path).map_err(|err| target.io_error(&err))?;
        let updated = replace_between(
            &text,
            str_arg(args, "begin_marker").unwrap_or_default(),
            str_arg(args, "end_marker").unwrap_or_default(),
            str_arg(args, "new_content").unwrap_or_default(),
        )?;
        fs::write(&target.path, &updated).map_err(|err| target.io_error(&err))?;
        debug!(path = %target.shown, "edited file between markers");
        Ok(format!(
            "Successfully edited {} between markers. Updated file content:\n{updated}",
            target.shown
        ))
    }
}
