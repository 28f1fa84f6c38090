//! Backlog loading with schema and structural validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::backlog::{Backlog, Task};

const BACKLOG_SCHEMA: &str = include_str!("../../../schemas/backlog.schema.json");

/// Load and validate a backlog file (schema, then dependency structure).
pub fn load_backlog(path: &Path) -> Result<Backlog> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read backlog {}", path.display()))?;
    parse_backlog(&contents).with_context(|| format!("load backlog {}", path.display()))
}

/// Parse backlog JSON: a bare task array or `{"root": [...]}`.
pub fn parse_backlog(contents: &str) -> Result<Backlog> {
    let value: Value = serde_json::from_str(contents).context("parse backlog json")?;
    validate_schema(&value)?;
    let tasks_value = match value {
        Value::Object(mut obj) => obj
            .remove("root")
            .ok_or_else(|| anyhow!("backlog object is missing 'root'"))?,
        other => other,
    };
    let tasks: Vec<Task> = serde_json::from_value(tasks_value).context("deserialize tasks")?;
    let backlog = Backlog::validate(tasks)?;
    Ok(backlog)
}

fn validator() -> Result<Validator> {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA).context("parse backlog schema")?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| anyhow!("compile backlog schema: {err}"))
}

fn validate_schema(value: &Value) -> Result<()> {
    let compiled = validator()?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "backlog schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

/// Write the validated order as pretty JSON.
pub fn write_backlog(path: &Path, backlog: &Backlog) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(backlog).context("serialize backlog")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write backlog {}", path.display()))
}
