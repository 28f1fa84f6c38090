//! Task execution engine.
//!
//! Drives each task through a bounded attempt loop:
//!
//! ```text
//! Pending -> Attempting -> AwaitingVerification -> Passed
//!                ^                 |
//!                |                 v
//!                +------------ Retrying -> Abandoned
//! ```
//!
//! Each attempt appends a directive (optionally preceded by a fresh workspace
//! listing), runs one or more generation cycles and dispatches every requested
//! tool call in order, then asks the verification gate for a verdict. A failed
//! verdict is appended to the transcript and the next attempt uses relaxed
//! sampling. A generation timeout or malformed response ends the attempt
//! without verification but still consumes it. Once `max_retries` attempts are
//! spent the task is abandoned; the backlog run continues with the next task.
//!
//! Only infrastructure failures (generator or verifier unreachable, template
//! errors) are returned as `Err`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::backlog::{Backlog, Task};
use crate::core::sampling::{SamplingConfig, sampling_for};
use crate::core::sandbox::PathSandbox;
use crate::core::types::{AttemptState, SamplingOptions, SubFailure, TaskState, TranscriptEntry, Verdict};
use crate::io::config::EngineConfig;
use crate::io::generator::{GenerateRequest, GenerationTimeout, Generator, MalformedResponse};
use crate::io::prompt::{DirectiveInputs, PromptEngine};
use crate::io::run_log::task_dir_name;
use crate::io::verifier::{Verifier, VerifyRequest};
use crate::io::workspace::workspace_listing;
use crate::tools::ToolRegistry;
use crate::transcript::{PriorTask, TranscriptStore, condensed_history};

/// Engine knobs, usually derived from [`EngineConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_retries: u32,
    pub generation_timeout: Duration,
    pub generation_cycles: u32,
    pub refresh_listing: bool,
    pub listing_max_entries: usize,
    pub seed_prior_history: bool,
    pub sampling: SamplingConfig,
    pub model: String,
    pub stream: bool,
}

impl EngineSettings {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            generation_timeout: cfg.generation_timeout(),
            generation_cycles: cfg.generation_cycles,
            refresh_listing: cfg.refresh_listing,
            listing_max_entries: cfg.listing_max_entries,
            seed_prior_history: cfg.seed_prior_history,
            sampling: cfg.sampling,
            model: cfg.generator.model.clone(),
            stream: cfg.generator.stream,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Verified { verdict: Verdict },
    Interrupted { reason: SubFailure, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 0-based.
    pub attempt: u32,
    pub sampling: SamplingOptions,
    pub tool_calls: usize,
    pub outcome: AttemptOutcome,
}

/// Everything the engine observed while running one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub final_state: TaskState,
    pub transitions: Vec<TaskState>,
    pub attempts: Vec<AttemptRecord>,
    pub verification_calls: u32,
    pub last_verdict: Option<Verdict>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub transcript: TranscriptStore,
}

impl TaskReport {
    pub fn passed(&self) -> bool {
        self.final_state == TaskState::Passed
    }

    pub fn attempts_used(&self) -> usize {
        self.attempts.len()
    }

    /// Sampling options in attempt order.
    pub fn samplings(&self) -> Vec<SamplingOptions> {
        self.attempts.iter().map(|a| a.sampling).collect()
    }

    fn as_prior(&self) -> PriorTask<'_> {
        PriorTask {
            id: &self.task_id,
            state: self.final_state,
            rationale: self.last_verdict.as_ref().map(|v| v.rationale.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BacklogReport {
    pub tasks: Vec<TaskReport>,
}

impl BacklogReport {
    pub fn passed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.passed()).count()
    }

    pub fn abandoned_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.final_state == TaskState::Abandoned)
            .count()
    }

    pub fn all_passed(&self) -> bool {
        self.tasks.iter().all(TaskReport::passed)
    }
}

/// Sequential executor for tasks against one workspace.
pub struct Engine<'a, G: Generator + ?Sized, V: Verifier + ?Sized> {
    generator: &'a G,
    verifier: &'a V,
    registry: &'a ToolRegistry,
    sandbox: &'a PathSandbox,
    prompts: PromptEngine,
    settings: EngineSettings,
    stream_dir: Option<PathBuf>,
}

impl<'a, G: Generator + ?Sized, V: Verifier + ?Sized> Engine<'a, G, V> {
    pub fn new(
        generator: &'a G,
        verifier: &'a V,
        registry: &'a ToolRegistry,
        sandbox: &'a PathSandbox,
        settings: EngineSettings,
    ) -> Result<Self> {
        Ok(Self {
            generator,
            verifier,
            registry,
            sandbox,
            prompts: PromptEngine::new()?,
            settings,
            stream_dir: None,
        })
    }

    /// Tee streamed responses to `<dir>/<task-id>/attempt-<n>-cycle-<m>.jsonl`.
    pub fn with_stream_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stream_dir = Some(dir.into());
        self
    }

    /// Run every task in backlog order.
    ///
    /// `on_task` sees each report as soon as its task reaches a terminal state.
    /// Abandoned tasks do not stop the run.
    pub fn run_backlog<F>(&self, backlog: &Backlog, mut on_task: F) -> Result<BacklogReport>
    where
        F: FnMut(&TaskReport) -> Result<()>,
    {
        let mut report = BacklogReport::default();
        for task in backlog.tasks() {
            let seed = if self.settings.seed_prior_history {
                let prior: Vec<PriorTask<'_>> =
                    report.tasks.iter().map(TaskReport::as_prior).collect();
                condensed_history(&prior).into_iter().collect()
            } else {
                Vec::new()
            };
            let task_report = self.run_task(task, seed)?;
            on_task(&task_report)?;
            report.tasks.push(task_report);
        }
        info!(
            passed = report.passed_count(),
            abandoned = report.abandoned_count(),
            "backlog finished"
        );
        Ok(report)
    }

    /// Run one task to a terminal state.
    #[instrument(skip_all, fields(task = %task.id, max_retries = self.settings.max_retries))]
    pub fn run_task(&self, task: &Task, seed: Vec<TranscriptEntry>) -> Result<TaskReport> {
        let started = Instant::now();
        let mut run = TaskRun::new(task, self.settings.max_retries);
        run.transcript
            .append(TranscriptEntry::system(self.prompts.render_system()?));
        for entry in seed {
            run.transcript.append(entry);
        }

        let mut state = AttemptState {
            attempt: 0,
            sampling: sampling_for(0, &self.settings.sampling),
            last_verdict: None,
        };

        loop {
            run.transition(TaskState::Attempting);
            self.open_attempt(task, &state, &mut run.transcript)?;

            let mut tool_calls = 0usize;
            if let Err(err) =
                self.generate_cycles(task, &state, &mut run.transcript, &mut tool_calls)
            {
                let Some(reason) = sub_failure(&err) else {
                    return Err(err.context(format!(
                        "task {} attempt {}",
                        task.id,
                        state.attempt + 1
                    )));
                };
                warn!(attempt = state.attempt, ?reason, err = %err, "attempt interrupted");
                run.transcript.append(TranscriptEntry::system(format!(
                    "Attempt {} ended before verification: {err}.",
                    state.attempt + 1
                )));
                run.attempts.push(AttemptRecord {
                    attempt: state.attempt,
                    sampling: state.sampling,
                    tool_calls,
                    outcome: AttemptOutcome::Interrupted {
                        reason,
                        message: err.to_string(),
                    },
                });
                if !self.advance(&mut state, &mut run) {
                    break;
                }
                continue;
            }

            run.transition(TaskState::AwaitingVerification);
            let verdict = self
                .verifier
                .verify(&VerifyRequest {
                    task_id: &task.id,
                    transcript: run.transcript.entries(),
                    acceptance_criteria: &task.acceptance_criteria,
                })
                .with_context(|| format!("verify task {}", task.id))?;
            run.verification_calls += 1;
            info!(attempt = state.attempt, passed = verdict.passed, "verdict received");

            run.attempts.push(AttemptRecord {
                attempt: state.attempt,
                sampling: state.sampling,
                tool_calls,
                outcome: AttemptOutcome::Verified {
                    verdict: verdict.clone(),
                },
            });
            let passed = verdict.passed;
            if passed {
                run.transcript.append(TranscriptEntry::system(format!(
                    "Verification passed: {}",
                    verdict.rationale
                )));
            } else {
                run.transcript.append(TranscriptEntry::system(format!(
                    "Verification failed: {}",
                    verdict.rationale
                )));
            }
            state.last_verdict = Some(verdict);

            if passed {
                run.transition(TaskState::Passed);
                break;
            }
            if !self.advance(&mut state, &mut run) {
                break;
            }
        }

        Ok(run.finish(state.last_verdict, started.elapsed()))
    }

    /// Consume the current attempt. Returns `false` once the task is abandoned.
    fn advance(&self, state: &mut AttemptState, run: &mut TaskRun<'_>) -> bool {
        state.attempt += 1;
        if state.attempt >= self.settings.max_retries {
            warn!(attempts = state.attempt, "task abandoned");
            let last = state
                .last_verdict
                .as_ref()
                .map_or("no verdict was reached", |v| v.rationale.as_str());
            run.transcript.append(TranscriptEntry::system(format!(
                "Task {} abandoned after {} attempt(s). Last failure: {last}. Changes already made remain in the workspace.",
                run.task_id, state.attempt
            )));
            run.transition(TaskState::Abandoned);
            return false;
        }
        state.sampling = sampling_for(state.attempt, &self.settings.sampling);
        debug!(attempt = state.attempt, sampling = ?state.sampling, "retrying with relaxed sampling");
        run.transition(TaskState::Retrying);
        true
    }

    fn open_attempt(
        &self,
        task: &Task,
        state: &AttemptState,
        transcript: &mut TranscriptStore,
    ) -> Result<()> {
        if self.settings.refresh_listing {
            // A failed walk costs the attempt its listing, not the run.
            let listing = workspace_listing(self.sandbox, self.settings.listing_max_entries)
                .unwrap_or_else(|err| {
                    warn!(err = ?err, "workspace listing failed");
                    format!("Workspace listing unavailable: {err:#}")
                });
            transcript.append(TranscriptEntry::system(listing));
        }
        let directive = self.prompts.render_directive(&DirectiveInputs {
            task,
            attempt: state.attempt,
            max_retries: self.settings.max_retries,
            previous_rationale: state.last_verdict.as_ref().map(|v| v.rationale.as_str()),
        })?;
        transcript.append(TranscriptEntry::user(directive));
        Ok(())
    }

    /// Run the configured generation cycles, dispatching tool calls in request order.
    ///
    /// `dispatched` counts calls as they run, so it stays accurate when a later cycle fails.
    fn generate_cycles(
        &self,
        task: &Task,
        state: &AttemptState,
        transcript: &mut TranscriptStore,
        dispatched: &mut usize,
    ) -> Result<()> {
        for cycle in 0..self.settings.generation_cycles {
            let request = GenerateRequest {
                model: self.settings.model.clone(),
                messages: transcript.entries().to_vec(),
                tools: self.registry.list(),
                options: state.sampling,
                stream: self.settings.stream,
                timeout: self.settings.generation_timeout,
                stream_path: self.stream_path(task, state.attempt, cycle),
            };
            let response = self.generator.generate(&request)?;
            if !response.content.trim().is_empty() {
                transcript.append(response.to_entry());
            }
            for call in &response.tool_calls {
                let result = self.registry.dispatch(call);
                transcript.append_tool_result(&result);
                *dispatched += 1;
            }
            debug!(
                cycle,
                tool_calls = response.tool_calls.len(),
                estimated_tokens = transcript.estimated_tokens(),
                "generation cycle complete"
            );
        }
        Ok(())
    }

    fn stream_path(&self, task: &Task, attempt: u32, cycle: u32) -> Option<PathBuf> {
        if !self.settings.stream {
            return None;
        }
        self.stream_dir.as_ref().map(|dir| {
            dir.join(task_dir_name(&task.id))
                .join(format!("attempt-{}-cycle-{}.jsonl", attempt + 1, cycle + 1))
        })
    }
}

fn sub_failure(err: &anyhow::Error) -> Option<SubFailure> {
    if err.downcast_ref::<GenerationTimeout>().is_some() {
        Some(SubFailure::Timeout)
    } else if err.downcast_ref::<MalformedResponse>().is_some() {
        Some(SubFailure::MalformedResponse)
    } else {
        None
    }
}

/// Mutable bookkeeping for one task run.
struct TaskRun<'t> {
    task_id: &'t str,
    transcript: TranscriptStore,
    transitions: Vec<TaskState>,
    attempts: Vec<AttemptRecord>,
    verification_calls: u32,
}

impl<'t> TaskRun<'t> {
    fn new(task: &'t Task, max_retries: u32) -> Self {
        info!(task = %task.id, max_retries, "task pending");
        Self {
            task_id: &task.id,
            transcript: TranscriptStore::new(),
            transitions: vec![TaskState::Pending],
            attempts: Vec::new(),
            verification_calls: 0,
        }
    }

    fn transition(&mut self, next: TaskState) {
        debug!(task = self.task_id, state = next.as_str(), "transition");
        if next.is_terminal() {
            info!(task = self.task_id, state = next.as_str(), "task finished");
        }
        self.transitions.push(next);
    }

    fn finish(self, last_verdict: Option<Verdict>, elapsed: Duration) -> TaskReport {
        let final_state = self
            .transitions
            .last()
            .copied()
            .unwrap_or(TaskState::Pending);
        TaskReport {
            task_id: self.task_id.to_string(),
            final_state,
            transitions: self.transitions,
            attempts: self.attempts,
            verification_calls: self.verification_calls,
            last_verdict,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            transcript: self.transcript,
        }
    }
}
