//! Backlog data model: tasks as handed over by the planning step.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::core::ordering::{BacklogError, order_tasks};

/// Category of work a task represents.
///
/// Serialized as snake_case; the planner's legacy names and upper-case codes
/// are accepted on input.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(alias = "INIT")]
    Init,
    #[serde(alias = "scaffolding", alias = "STRUCT")]
    Scaffold,
    #[serde(alias = "MODEL")]
    Model,
    #[serde(alias = "COMP")]
    Component,
    #[serde(alias = "UTIL")]
    Util,
    #[serde(alias = "feature_implementation")]
    Feature,
    #[serde(alias = "configuration", alias = "CONFIG")]
    Config,
    #[serde(alias = "documentation", alias = "DOC")]
    Doc,
    #[serde(alias = "PKG")]
    Package,
    #[serde(alias = "INTEG")]
    Integration,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Init => "init",
            TaskType::Scaffold => "scaffold",
            TaskType::Model => "model",
            TaskType::Component => "component",
            TaskType::Util => "util",
            TaskType::Feature => "feature",
            TaskType::Config => "config",
            TaskType::Doc => "doc",
            TaskType::Package => "package",
            TaskType::Integration => "integration",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

/// What the task should do: free-form text or a structured operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TaskDescription {
    Text(String),
    Structured(OperationDescription),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationDescription {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

impl TaskDescription {
    pub fn render(&self) -> String {
        match self {
            TaskDescription::Text(text) => text.trim().to_string(),
            TaskDescription::Structured(op) => {
                let mut buf = format!("operation: {}\n", op.operation);
                if let Some(path) = &op.path {
                    let _ = writeln!(buf, "path: {path}");
                }
                if let Some(content) = &op.content {
                    let _ = writeln!(buf, "content:\n{content}");
                }
                if !op.steps.is_empty() {
                    buf.push_str("steps:\n");
                    for (i, step) in op.steps.iter().enumerate() {
                        let _ = writeln!(buf, "{}. {step}", i + 1);
                    }
                }
                buf.trim_end().to_string()
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(alias = "task_id")]
    pub id: String,
    #[serde(rename = "type", alias = "task_type")]
    pub task_type: TaskType,
    #[serde(alias = "task_description")]
    pub description: TaskDescription,
    #[serde(default, alias = "task_notes")]
    pub notes: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, alias = "task_dependencies")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_complexity: Option<Complexity>,
}

/// A validated, dependency-ordered, non-empty sequence of tasks.
///
/// Only obtainable through [`Backlog::validate`]; immutable afterwards.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Backlog {
    tasks: Vec<Task>,
}

impl Backlog {
    /// Validate `tasks` and order them so dependencies come first.
    ///
    /// Ties are broken by input order.
    pub fn validate(tasks: Vec<Task>) -> Result<Self, BacklogError> {
        order_tasks(tasks).map(|tasks| Self { tasks })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_field_names() {
        let raw = r#"{
            "task_id": "SC-CORE-01",
            "task_type": "scaffolding",
            "task_description": {"operation": "create_file", "path": "README.md", "steps": ["write it"]},
            "task_notes": "keep it short",
            "acceptance_criteria": ["README.md exists"],
            "task_dependencies": [],
            "estimated_complexity": "LOW"
        }"#;
        let task: Task = serde_json::from_str(raw).expect("parse task");
        assert_eq!(task.id, "SC-CORE-01");
        assert_eq!(task.task_type, TaskType::Scaffold);
        assert_eq!(task.estimated_complexity, Some(Complexity::Low));
        let rendered = task.description.render();
        assert!(rendered.contains("operation: create_file"));
        assert!(rendered.contains("1. write it"));
    }

    #[test]
    fn accepts_upper_case_type_codes() {
        let task: Task = serde_json::from_str(
            r#"{"id": "PKG-NODE-01", "type": "PKG", "description": "install deps"}"#,
        )
        .expect("parse task");
        assert_eq!(task.task_type, TaskType::Package);
        assert!(task.dependencies.is_empty());
        assert_eq!(task.description.render(), "install deps");
    }

    #[test]
    fn serializes_canonical_names() {
        let task: Task = serde_json::from_str(
            r#"{"id": "DOC-1", "type": "documentation", "description": "docs"}"#,
        )
        .expect("parse task");
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["type"], "doc");
        assert_eq!(value["id"], "DOC-1");
    }
}
