//! Verification gate implementations.
//!
//! A gate judges one attempt from the task transcript and acceptance
//! criteria. [`ModelVerifier`] asks the generation service; [`CommandVerifier`]
//! runs a check command (e.g. `just ci`) in the workspace.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{SamplingOptions, TranscriptEntry, Verdict};
use crate::core::verdict::parse_verdict;
use crate::io::config::{EngineConfig, VerifierConfig};
use crate::io::generator::{GenerateRequest, GenerationTimeout, Generator, MalformedResponse};
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::PromptEngine;

/// Inputs for one verification call.
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest<'a> {
    pub task_id: &'a str,
    pub transcript: &'a [TranscriptEntry],
    /// Passed through verbatim.
    pub acceptance_criteria: &'a [String],
}

/// Abstraction over verification gates.
///
/// A gate that cannot reach a judgement returns a failing verdict; `Err` is
/// reserved for infrastructure failures.
pub trait Verifier {
    fn verify(&self, request: &VerifyRequest<'_>) -> Result<Verdict>;
}

/// Gate that asks the generation service to review the transcript.
pub struct ModelVerifier<'g, G: Generator + ?Sized> {
    generator: &'g G,
    prompts: PromptEngine,
    model: String,
    stream: bool,
    temperature: f64,
    timeout: Duration,
}

impl<'g, G: Generator + ?Sized> ModelVerifier<'g, G> {
    pub fn new(generator: &'g G, cfg: &EngineConfig) -> Result<Self> {
        Ok(Self {
            generator,
            prompts: PromptEngine::new()?,
            model: cfg.generator.model.clone(),
            stream: cfg.generator.stream,
            temperature: cfg.verifier.temperature,
            timeout: cfg.verifier_timeout(),
        })
    }
}

impl<G: Generator + ?Sized> Verifier for ModelVerifier<'_, G> {
    #[instrument(skip_all, fields(task = request.task_id, transcript_len = request.transcript.len()))]
    fn verify(&self, request: &VerifyRequest<'_>) -> Result<Verdict> {
        let mut messages = request.transcript.to_vec();
        messages.push(TranscriptEntry::system(
            self.prompts.render_verify_system()?,
        ));
        messages.push(TranscriptEntry::user(
            self.prompts
                .render_verify(request.task_id, request.acceptance_criteria)?,
        ));

        let generate = GenerateRequest {
            model: self.model.clone(),
            messages,
            tools: Vec::new(),
            options: SamplingOptions {
                temperature: self.temperature,
                top_p: 1.0,
                top_k: None,
            },
            stream: self.stream,
            timeout: self.timeout,
            stream_path: None,
        };

        match self.generator.generate(&generate) {
            Ok(response) => {
                let verdict = parse_verdict(&response.content);
                debug!(passed = verdict.passed, "model verdict");
                Ok(verdict)
            }
            Err(err)
                if err.downcast_ref::<GenerationTimeout>().is_some()
                    || err.downcast_ref::<MalformedResponse>().is_some() =>
            {
                warn!(err = %err, "verification did not complete, failing closed");
                Ok(Verdict::fail(format!("verification did not complete: {err}")))
            }
            Err(err) => Err(err.context("model verification")),
        }
    }
}

/// Gate that passes iff a command exits successfully in the workspace.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandVerifier {
    pub fn new(cfg: &VerifierConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: cfg.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn shown(&self) -> String {
        self.command.join(" ")
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(task = request.task_id, command = %self.shown()))]
    fn verify(&self, request: &VerifyRequest<'_>) -> Result<Verdict> {
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("verifier.command must be a non-empty array");
        };
        info!(workdir = %self.workdir.display(), "running verification command");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run verification command `{}`", self.shown()))?;

        let combined = output.combined("verifier");
        let body = combined.trim();
        if output.timed_out {
            return Ok(Verdict::fail(format!(
                "`{}` timed out after {}s\n{body}",
                self.shown(),
                self.timeout.as_secs()
            )));
        }
        let summary = format!(
            "`{}` exited with status {}",
            self.shown(),
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string())
        );
        let rationale = if body.is_empty() {
            summary
        } else {
            format!("{summary}\n{body}")
        };
        Ok(if output.status.success() {
            Verdict::pass(rationale)
        } else {
            Verdict::fail(rationale)
        })
    }
}
