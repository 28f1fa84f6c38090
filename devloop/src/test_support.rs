//! Test-only helpers: scripted generation/verification and throwaway workspaces.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::backlog::{Task, TaskDescription, TaskType};
use crate::core::sandbox::PathSandbox;
use crate::core::types::{TranscriptEntry, Verdict};
use crate::io::config::ToolsConfig;
use crate::io::generator::{
    GenerateRequest, GenerateResponse, GenerationTimeout, Generator, MalformedResponse,
};
use crate::io::verifier::{Verifier, VerifyRequest};
use crate::tools::{ToolRegistry, standard_registry};

/// Create a deterministic task with default fields.
pub fn task(id: &str, dependencies: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        task_type: TaskType::Feature,
        description: TaskDescription::Text(format!("{id} description")),
        notes: String::new(),
        acceptance_criteria: vec![format!("{id} is done")],
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        estimated_complexity: None,
    }
}

/// Generator that replays queued responses and records every request.
///
/// Once the queue is empty it answers with an empty text response.
#[derive(Default)]
pub struct ScriptedGenerator {
    queue: RefCell<VecDeque<Result<GenerateResponse>>>,
    requests: RefCell<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: GenerateResponse) {
        self.queue.borrow_mut().push_back(Ok(response));
    }

    pub fn push_timeout(&self) {
        self.queue.borrow_mut().push_back(Err(GenerationTimeout {
            timeout: Duration::from_secs(60),
        }
        .into()));
    }

    pub fn push_malformed(&self, reason: &str) {
        self.queue.borrow_mut().push_back(Err(MalformedResponse {
            reason: reason.to_string(),
        }
        .into()));
    }

    pub fn push_error(&self, message: &str) {
        self.queue.borrow_mut().push_back(Err(anyhow!("{message}")));
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        self.requests.borrow_mut().push(request.clone());
        self.queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(GenerateResponse::default()))
    }
}

/// Verifier that replays queued verdicts, then fails every further call.
pub struct ScriptedVerifier {
    queue: RefCell<VecDeque<Verdict>>,
    calls: Cell<u32>,
    transcripts: RefCell<Vec<Vec<TranscriptEntry>>>,
}

impl ScriptedVerifier {
    pub fn new(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        Self {
            queue: RefCell::new(verdicts.into_iter().collect()),
            calls: Cell::new(0),
            transcripts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    /// Transcript snapshot seen by each call, in call order.
    pub fn transcripts(&self) -> Vec<Vec<TranscriptEntry>> {
        self.transcripts.borrow().clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, request: &VerifyRequest<'_>) -> Result<Verdict> {
        self.calls.set(self.calls.get() + 1);
        self.transcripts
            .borrow_mut()
            .push(request.transcript.to_vec());
        Ok(self
            .queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Verdict::fail("scripted verifier exhausted")))
    }
}

/// Temporary workspace with a sandbox and the standard tool registry.
pub struct TestWorkspace {
    pub sandbox: PathSandbox,
    pub registry: ToolRegistry,
    _temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonicalize tempdir");
        let sandbox = PathSandbox::new(&root).expect("sandbox");
        let registry =
            standard_registry(&sandbox, &ToolsConfig::default()).expect("standard registry");
        Self {
            sandbox,
            registry,
            _temp: temp,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.sandbox.root().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read file")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
