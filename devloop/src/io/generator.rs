//! Generation-service boundary.
//!
//! The [`Generator`] trait decouples the engine from the model backend. The
//! default backend, [`CommandGenerator`], speaks a JSON-over-stdio protocol
//! with a child process; tests use scripted generators instead.
//!
//! Protocol: the request is written to the child's stdin as one JSON object.
//! Without streaming the child prints one response object
//! `{"content": ..., "tool_calls": [{"name": ..., "arguments": ...}]}`. With
//! streaming it prints one chunk per line in the same shape plus an optional
//! `"done": true`; chunks are reassembled into a single response.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{SamplingOptions, ToolCall, TranscriptEntry};
use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_stream;

const RESPONSE_SCHEMA: &str = include_str!("../../../schemas/generate_response.schema.json");

/// One call to the generation service.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<TranscriptEntry>,
    /// Function-calling schemas; empty when no tools are offered.
    pub tools: Vec<Value>,
    pub options: SamplingOptions,
    pub stream: bool,
    /// Per-call bound, enforced by the implementation.
    #[serde(skip)]
    pub timeout: Duration,
    /// Where to tee raw stream chunks, if anywhere.
    #[serde(skip)]
    pub stream_path: Option<PathBuf>,
}

/// A complete (reassembled) response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl GenerateResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Assistant entry recording the message text.
    ///
    /// Requested calls are not recorded; only their results enter the transcript.
    pub fn to_entry(&self) -> TranscriptEntry {
        TranscriptEntry::assistant(self.content.clone())
    }
}

/// The call exceeded its timeout. Recoverable: costs one attempt.
#[derive(Debug, Error)]
#[error("generation timed out after {}s", .timeout.as_secs())]
pub struct GenerationTimeout {
    pub timeout: Duration,
}

/// The service answered with output that violates the response protocol. Recoverable.
#[derive(Debug, Error)]
#[error("malformed generation response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
}

impl MalformedResponse {
    fn new(reason: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self {
            reason: reason.into(),
        })
    }
}

/// Abstraction over generation backends.
///
/// Implementations signal recoverable failures with [`GenerationTimeout`] or
/// [`MalformedResponse`] inside the returned error; anything else is treated
/// as an infrastructure failure.
pub trait Generator {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Generator that runs a child process per call.
pub struct CommandGenerator {
    command: Vec<String>,
    output_limit_bytes: usize,
    validator: Validator,
}

impl std::fmt::Debug for CommandGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGenerator")
            .field("command", &self.command)
            .field("output_limit_bytes", &self.output_limit_bytes)
            .finish_non_exhaustive()
    }
}

impl CommandGenerator {
    pub fn new(cfg: &GeneratorConfig) -> Result<Self> {
        if cfg.command.is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        Ok(Self {
            command: cfg.command.clone(),
            output_limit_bytes: cfg.output_limit_bytes,
            validator: response_validator()?,
        })
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(model = %request.model, stream = request.stream, messages = request.messages.len()))]
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let payload = serde_json::to_vec(request).context("serialize generation request")?;
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);

        info!(temperature = request.options.temperature, "requesting generation");
        let output = run_command_with_stream(
            cmd,
            Some(&payload),
            request.timeout,
            self.output_limit_bytes,
            request.stream_path.as_deref(),
        )
        .context("run generator command")?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "generation timed out");
            return Err(GenerationTimeout {
                timeout: request.timeout,
            }
            .into());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "generator exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(MalformedResponse::new(format!(
                "response exceeded {} bytes",
                self.output_limit_bytes
            )));
        }
        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| MalformedResponse::new("response is not valid UTF-8"))?;

        let response = if request.stream {
            assemble_stream(&stdout, &self.validator)?
        } else {
            parse_response(&stdout, &self.validator)?
        };
        debug!(
            content_bytes = response.content.len(),
            tool_calls = response.tool_calls.len(),
            "generation complete"
        );
        Ok(response)
    }
}

/// Compile the embedded response/chunk schema.
pub fn response_validator() -> Result<Validator> {
    let schema: Value =
        serde_json::from_str(RESPONSE_SCHEMA).context("parse generate_response schema")?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| anyhow!("compile generate_response schema: {err}"))
}

#[derive(Debug, Default, Deserialize)]
struct Chunk {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    done: bool,
}

fn parse_chunk(raw: &str, validator: &Validator, what: &str) -> Result<Chunk> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| MalformedResponse::new(format!("{what} is not JSON: {err}")))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(MalformedResponse::new(format!(
            "{what} violates the response schema: {}",
            messages.join("; ")
        )));
    }
    serde_json::from_value(value)
        .map_err(|err| MalformedResponse::new(format!("{what} could not be decoded: {err}")))
}

/// Parse a single-shot response body.
pub fn parse_response(raw: &str, validator: &Validator) -> Result<GenerateResponse> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MalformedResponse::new("empty response"));
    }
    let chunk = parse_chunk(trimmed, validator, "response")?;
    Ok(GenerateResponse {
        content: chunk.content.unwrap_or_default(),
        tool_calls: chunk.tool_calls.unwrap_or_default(),
    })
}

/// Reassemble JSON-lines chunks into one response.
///
/// Content is concatenated and tool calls are kept in arrival order. Lines
/// after a `done` chunk are ignored.
pub fn assemble_stream(raw: &str, validator: &Validator) -> Result<GenerateResponse> {
    let mut response = GenerateResponse::default();
    let mut chunks = 0usize;
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk = parse_chunk(line, validator, &format!("stream line {}", index + 1))?;
        chunks += 1;
        if let Some(content) = chunk.content {
            response.content.push_str(&content);
        }
        if let Some(calls) = chunk.tool_calls {
            response.tool_calls.extend(calls);
        }
        if chunk.done {
            break;
        }
    }
    if chunks == 0 {
        return Err(MalformedResponse::new("stream contained no chunks"));
    }
    Ok(response)
}
