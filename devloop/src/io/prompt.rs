//! Message rendering for the generation service and the model verifier.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::backlog::Task;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const DIRECTIVE_TEMPLATE: &str = include_str!("prompts/directive.md");
const VERIFY_SYSTEM_TEMPLATE: &str = include_str!("prompts/verify_system.md");
const VERIFY_TEMPLATE: &str = include_str!("prompts/verify.md");

/// Task fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    task_type: &'static str,
    description: String,
    notes: &'a str,
    acceptance_criteria: &'a [String],
    dependencies: &'a [String],
}

impl<'a> TaskContext<'a> {
    fn from_task(task: &'a Task) -> Self {
        Self {
            id: &task.id,
            task_type: task.task_type.as_str(),
            description: task.description.render(),
            notes: task.notes.trim(),
            acceptance_criteria: &task.acceptance_criteria,
            dependencies: &task.dependencies,
        }
    }
}

/// Inputs for one attempt's directive.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveInputs<'a> {
    pub task: &'a Task,
    /// 0-based attempt counter.
    pub attempt: u32,
    pub max_retries: u32,
    /// Rationale of the last failed verification, if any.
    pub previous_rationale: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("directive", DIRECTIVE_TEMPLATE),
            ("verify_system", VERIFY_SYSTEM_TEMPLATE),
            ("verify", VERIFY_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    pub fn render_system(&self) -> Result<String> {
        self.render("system", context! {})
    }

    pub fn render_directive(&self, input: &DirectiveInputs<'_>) -> Result<String> {
        self.render(
            "directive",
            context! {
                task => TaskContext::from_task(input.task),
                attempt => input.attempt + 1,
                max_retries => input.max_retries,
                previous_rationale => input.previous_rationale.map(str::trim).filter(|s| !s.is_empty()),
            },
        )
    }

    pub fn render_verify_system(&self) -> Result<String> {
        self.render("verify_system", context! {})
    }

    pub fn render_verify(&self, task_id: &str, acceptance_criteria: &[String]) -> Result<String> {
        self.render(
            "verify",
            context! {
                task_id => task_id,
                acceptance_criteria => acceptance_criteria,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} template"))?;
        Ok(rendered.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{TaskDescription, TaskType};

    fn task() -> Task {
        Task {
            id: "FEAT-API-01".to_string(),
            task_type: TaskType::Feature,
            description: TaskDescription::Text("Add a /health endpoint.".to_string()),
            notes: "Use the existing router.".to_string(),
            acceptance_criteria: vec![
                "GET /health returns 200".to_string(),
                "Route is documented in README.md".to_string(),
            ],
            dependencies: vec!["SC-CORE-01".to_string()],
            estimated_complexity: None,
        }
    }

    #[test]
    fn directive_lists_task_fields() {
        let engine = PromptEngine::new().expect("engine");
        let task = task();
        let rendered = engine
            .render_directive(&DirectiveInputs {
                task: &task,
                attempt: 0,
                max_retries: 3,
                previous_rationale: None,
            })
            .expect("render");
        assert!(rendered.starts_with("# Task FEAT-API-01 (feature)"));
        assert!(rendered.contains("Attempt 1 of 3."));
        assert!(rendered.contains("Add a /health endpoint."));
        assert!(rendered.contains("- GET /health returns 200"));
        assert!(rendered.contains("Already completed before this task: SC-CORE-01."));
        assert!(!rendered.contains("Previous attempt"));
    }

    #[test]
    fn directive_includes_previous_rationale() {
        let engine = PromptEngine::new().expect("engine");
        let task = task();
        let rendered = engine
            .render_directive(&DirectiveInputs {
                task: &task,
                attempt: 1,
                max_retries: 3,
                previous_rationale: Some("README.md was not updated"),
            })
            .expect("render");
        assert!(rendered.contains("Attempt 2 of 3."));
        assert!(rendered.contains("Previous attempt was rejected"));
        assert!(rendered.contains("README.md was not updated"));
    }

    #[test]
    fn verify_numbers_criteria() {
        let engine = PromptEngine::new().expect("engine");
        let rendered = engine
            .render_verify("FEAT-API-01", &task().acceptance_criteria)
            .expect("render");
        assert!(rendered.contains("1. GET /health returns 200"));
        assert!(rendered.contains("2. Route is documented in README.md"));
    }

    #[test]
    fn system_prompts_render() {
        let engine = PromptEngine::new().expect("engine");
        assert!(engine.render_system().expect("system").contains("edit_file"));
        assert!(
            engine
                .render_verify_system()
                .expect("verify system")
                .contains("\"passed\"")
        );
    }
}
