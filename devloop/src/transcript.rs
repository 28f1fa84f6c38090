//! Append-only transcript of one task's execution.
//!
//! The transcript is the only memory handed to the generation service and the
//! verification gate. Entries are never edited or removed once appended.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{TaskState, ToolResult, TranscriptEntry};

/// Outcome of an earlier task, as shown to later tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorTask<'a> {
    pub id: &'a str,
    pub state: TaskState,
    /// Last verification rationale, if any.
    pub rationale: Option<&'a str>,
}

const RATIONALE_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TranscriptStore {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from explicit seed entries (e.g. a condensed view of earlier tasks).
    pub fn seeded(seed: impl IntoIterator<Item = TranscriptEntry>) -> Self {
        Self {
            entries: seed.into_iter().collect(),
        }
    }

    pub fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn append_tool_result(&mut self, result: &ToolResult) {
        self.entries.push(result.to_entry());
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Rough token estimate: four characters per token.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .entries
            .iter()
            .map(|entry| entry.content.chars().count())
            .sum();
        chars.div_ceil(4)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(self).context("serialize transcript")?;
        buf.push('\n');
        Ok(buf)
    }
}

/// One system entry summarizing earlier tasks, or `None` if there are none.
pub fn condensed_history(prior: &[PriorTask<'_>]) -> Option<TranscriptEntry> {
    if prior.is_empty() {
        return None;
    }
    let mut out = String::from("Earlier tasks in this run:");
    for task in prior {
        out.push_str(&format!("\n- {}: {}", task.id, task.state.as_str()));
        if task.state != TaskState::Passed
            && let Some(rationale) = task.rationale.map(preview).filter(|r| !r.is_empty())
        {
            out.push_str(&format!(" ({rationale})"));
        }
    }
    Some(TranscriptEntry::system(out))
}

fn preview(text: &str) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first_line.chars().count() <= RATIONALE_PREVIEW_CHARS {
        return first_line.to_string();
    }
    let cut: String = first_line.chars().take(RATIONALE_PREVIEW_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::tools::ToolError;

    #[test]
    fn append_preserves_order() {
        let mut transcript = TranscriptStore::seeded([TranscriptEntry::system("sys")]);
        transcript.append(TranscriptEntry::user("do it"));
        transcript.append_tool_result(&ToolResult::success("read_file", "contents"));
        transcript.append_tool_result(&ToolResult::failure(
            "list_directory",
            ToolError::NotFound {
                path: "src".to_string(),
            },
        ));
        let roles: Vec<Role> = transcript.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Tool, Role::Tool]);
        assert_eq!(transcript.entries()[2].name.as_deref(), Some("read_file"));
        assert!(transcript.entries()[3].content.starts_with("Error (not_found)"));
    }

    #[test]
    fn estimated_tokens_rounds_up() {
        let mut transcript = TranscriptStore::new();
        assert_eq!(transcript.estimated_tokens(), 0);
        transcript.append(TranscriptEntry::user("12345"));
        assert_eq!(transcript.estimated_tokens(), 2);
    }

    #[test]
    fn json_uses_lowercase_roles() {
        let transcript = TranscriptStore::seeded([TranscriptEntry::assistant("done")]);
        let raw = transcript.to_json().expect("json");
        assert!(raw.contains("\"role\": \"assistant\""));
    }

    #[test]
    fn condensed_history_lists_outcomes() {
        assert!(condensed_history(&[]).is_none());
        let entry = condensed_history(&[
            PriorTask {
                id: "SC-1",
                state: TaskState::Passed,
                rationale: Some("all good"),
            },
            PriorTask {
                id: "FEAT-2",
                state: TaskState::Abandoned,
                rationale: Some("\nREADME missing\nmore detail"),
            },
        ])
        .expect("entry");
        assert_eq!(entry.role, Role::System);
        assert_eq!(
            entry.content,
            "Earlier tasks in this run:\n- SC-1: passed\n- FEAT-2: abandoned (README missing)"
        );
    }
}
