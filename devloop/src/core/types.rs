//! Shared deterministic types for the engine core.
//!
//! These types define the stable contracts between the engine, the tool layer,
//! the generation service and the verification gate. They carry no I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolError;

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One message in a task transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// Tool name for `Role::Tool` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A tool invocation requested by the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Either a JSON object or a JSON-encoded object string, as providers differ.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Normalize the arguments into a JSON object.
    ///
    /// `null` is treated as an empty object; a string is decoded as JSON.
    pub fn arguments_object(&self) -> Result<Map<String, Value>, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };
        match &self.arguments {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(invalid("arguments string is not a JSON object".to_string())),
                Err(err) => Err(invalid(format!("arguments string is not valid JSON: {err}"))),
            },
            other => Err(invalid(format!(
                "arguments must be an object, got {}",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Outcome of one tool invocation. Failures are conversation content, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub name: String,
    pub outcome: Result<String, ToolError>,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(content.into()),
        }
    }

    pub fn failure(name: impl Into<String>, error: ToolError) -> Self {
        Self {
            name: name.into(),
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Render the result as the text fed back to the generation service.
    pub fn render(&self) -> String {
        match &self.outcome {
            Ok(content) => content.clone(),
            Err(err) => format!(
                "Error ({}): {err}. Please try a different approach.",
                err.code()
            ),
        }
    }

    pub fn to_entry(&self) -> TranscriptEntry {
        TranscriptEntry {
            role: Role::Tool,
            content: self.render(),
            name: Some(self.name.clone()),
        }
    }
}

/// Verification gate judgement for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub rationale: String,
}

impl Verdict {
    pub fn pass(rationale: impl Into<String>) -> Self {
        Self {
            passed: true,
            rationale: rationale.into(),
        }
    }

    pub fn fail(rationale: impl Into<String>) -> Self {
        Self {
            passed: false,
            rationale: rationale.into(),
        }
    }
}

/// Sampling parameters sent with a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

/// Lifecycle states of a task inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Attempting,
    AwaitingVerification,
    Retrying,
    Passed,
    Abandoned,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Passed | TaskState::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Attempting => "attempting",
            TaskState::AwaitingVerification => "awaiting_verification",
            TaskState::Retrying => "retrying",
            TaskState::Passed => "passed",
            TaskState::Abandoned => "abandoned",
        }
    }
}

/// Per-attempt bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptState {
    /// 0-based attempt counter, bounded by `max_retries`.
    pub attempt: u32,
    pub sampling: SamplingOptions,
    pub last_verdict: Option<Verdict>,
}

/// Why an attempt ended without reaching verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubFailure {
    Timeout,
    MalformedResponse,
}
