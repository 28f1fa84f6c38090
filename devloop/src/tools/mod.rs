//! Tool catalog exposed to the generation service.
//!
//! The registry is built once at startup and owned by the caller; it is the
//! only surface through which generated output can mutate the workspace.
//! Tool failures are values ([`ToolResult`] with an error outcome) that go back
//! into the transcript, never process-fatal errors.

pub mod fs;
pub mod package;

use anyhow::{Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::marker::MarkerError;
use crate::core::sandbox::PathSandbox;
use crate::core::types::{ToolCall, ToolResult};
use crate::io::config::ToolsConfig;

/// Recoverable tool failure, rendered into the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("'{path}' already exists")]
    AlreadyExists { path: String },
    #[error("'{path}' does not exist")]
    NotFound { path: String },
    #[error("'{path}' is not a directory")]
    NotADirectory { path: String },
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error(transparent)]
    MarkerNotFound(#[from] MarkerError),
    #[error("command '{command}' is not allowed")]
    Blocked { command: String },
    #[error("'{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
}

impl ToolError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::InvalidPath { .. } => "invalid_path",
            ToolError::AlreadyExists { .. } => "already_exists",
            ToolError::NotFound { .. } => "not_found",
            ToolError::NotADirectory { .. } => "not_a_directory",
            ToolError::UnknownTool { .. } => "unknown_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::MarkerNotFound(_) => "marker_not_found",
            ToolError::Blocked { .. } => "blocked",
            ToolError::CommandFailed { .. } => "command_failed",
            ToolError::Io { .. } => "io",
        }
    }

    pub(crate) fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        ToolError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
}

impl ParamKind {
    fn schema(self) -> Value {
        match self {
            ParamKind::String => json!({"type": "string"}),
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    /// Allowed values; empty means unrestricted.
    pub choices: &'static [&'static str],
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            choices: &[],
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn one_of(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = choices;
        self
    }
}

/// Name, description and input schema of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// JSON Schema for the tool's argument object.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut schema = param.kind.schema();
            if let Value::Object(obj) = &mut schema {
                obj.insert("description".to_string(), json!(param.description));
                if !param.choices.is_empty() {
                    obj.insert("enum".to_string(), json!(param.choices));
                }
            }
            properties.insert(param.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Function-calling schema advertised to the generation service.
    pub fn to_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// A named operation the generation service may request.
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run the tool with schema-checked arguments.
    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError>;
}

struct Entry {
    spec: ToolSpec,
    validator: Validator,
    tool: Box<dyn Tool>,
}

/// Startup-time catalog of tools, listed in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names are unique; re-registering a name is an error.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        if self.entries.iter().any(|e| e.spec.name == spec.name) {
            return Err(anyhow!("tool '{}' is already registered", spec.name));
        }
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&spec.parameters_schema())
            .map_err(|err| anyhow!("invalid parameter schema for '{}': {err}", spec.name))?;
        self.entries.push(Entry {
            spec,
            validator,
            tool,
        });
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.spec.name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool schemas for advertising to the generation service.
    pub fn list(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.spec.to_schema()).collect()
    }

    /// Validate arguments and run the named tool.
    ///
    /// Only `UnknownTool` and `InvalidArguments` are returned as `Err`; failures
    /// inside the tool are wrapped into the returned [`ToolResult`].
    pub fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.spec.name == name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;

        let missing: Vec<&str> = entry
            .spec
            .params
            .iter()
            .filter(|p| p.required && !args.contains_key(p.name))
            .map(|p| p.name)
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: format!("missing required parameter(s): {}", missing.join(", ")),
            });
        }

        let instance = Value::Object(args.clone());
        let messages: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: messages.join("; "),
            });
        }

        Ok(match entry.tool.execute(args) {
            Ok(content) => ToolResult::success(name, content),
            Err(err) => ToolResult::failure(name, err),
        })
    }

    /// Run a requested call; every failure becomes an error-valued result.
    #[instrument(skip_all, fields(tool = %call.name))]
    pub fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let result = call
            .arguments_object()
            .and_then(|args| self.invoke(&call.name, &args))
            .unwrap_or_else(|err| ToolResult::failure(call.name.clone(), err));
        match &result.outcome {
            Ok(content) => debug!(bytes = content.len(), "tool succeeded"),
            Err(err) => warn!(code = err.code(), err = %err, "tool failed"),
        }
        result
    }
}

/// Registry with every standard tool bound to `sandbox`.
pub fn standard_registry(sandbox: &PathSandbox, cfg: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in fs::standard_fs_tools(sandbox) {
        registry.register(tool)?;
    }
    registry.register(Box::new(package::NpmTool::new(sandbox.clone(), cfg)))?;
    registry.register(Box::new(package::PipTool::new(sandbox.clone(), cfg)))?;
    Ok(registry)
}

/// Fetch a string argument, already schema-checked when present.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}
