//! Run logging under `<state-dir>/runs/<run-id>/`.
//!
//! Layout:
//!
//! ```text
//! runs/<run-id>/run.json            run id, start time, backlog digest, task order
//! runs/<run-id>/backlog.json        the backlog in execution order
//! runs/<run-id>/<task>/meta.json    final state, transitions, attempts, samplings
//! runs/<run-id>/<task>/transcript.json
//! runs/<run-id>/summary.json        written once the backlog finishes
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::backlog::Backlog;
use crate::engine::{BacklogReport, TaskReport};
use crate::io::backlog_store::write_backlog;

#[derive(Debug, Clone, Serialize)]
struct RunMeta<'a> {
    run_id: &'a str,
    started_at: String,
    backlog_source: String,
    backlog_sha256: String,
    task_order: Vec<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
struct TaskMeta<'a> {
    run_id: &'a str,
    recorded_at: String,
    #[serde(flatten)]
    report: &'a TaskReport,
}

#[derive(Debug, Clone, Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    finished_at: String,
    passed: usize,
    abandoned: usize,
    tasks: Vec<TaskLine<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct TaskLine<'a> {
    id: &'a str,
    state: &'static str,
    attempts: usize,
}

/// Handle on one run's log directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
}

impl RunLog {
    /// Allocate a fresh run directory and record the backlog it executes.
    pub fn create(state_dir: &Path, backlog_source: &Path, backlog: &Backlog) -> Result<Self> {
        let run_id = generate_run_id();
        let log = Self::at(state_dir, &run_id);
        fs::create_dir_all(&log.dir)
            .with_context(|| format!("create run dir {}", log.dir.display()))?;

        let meta = RunMeta {
            run_id: &run_id,
            started_at: Utc::now().to_rfc3339(),
            backlog_source: backlog_source.display().to_string(),
            backlog_sha256: file_sha256(backlog_source)?,
            task_order: backlog.ids(),
        };
        write_json(&log.dir.join("run.json"), &meta)?;
        write_backlog(&log.dir.join("backlog.json"), backlog)?;
        Ok(log)
    }

    /// Paths for an existing run; nothing is created.
    pub fn at(state_dir: &Path, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            dir: state_dir.join("runs").join(run_id),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.dir.join(task_dir_name(task_id))
    }

    pub fn record_task(&self, report: &TaskReport) -> Result<PathBuf> {
        let dir = self.task_dir(&report.task_id);
        fs::create_dir_all(&dir).with_context(|| format!("create task dir {}", dir.display()))?;
        let meta = TaskMeta {
            run_id: &self.run_id,
            recorded_at: Utc::now().to_rfc3339(),
            report,
        };
        write_json(&dir.join("meta.json"), &meta)?;
        write_text(&dir.join("transcript.json"), &report.transcript.to_json()?)?;
        Ok(dir)
    }

    pub fn finish(&self, report: &BacklogReport) -> Result<PathBuf> {
        let summary = RunSummary {
            run_id: &self.run_id,
            finished_at: Utc::now().to_rfc3339(),
            passed: report.passed_count(),
            abandoned: report.abandoned_count(),
            tasks: report
                .tasks
                .iter()
                .map(|t| TaskLine {
                    id: &t.task_id,
                    state: t.final_state.as_str(),
                    attempts: t.attempts_used(),
                })
                .collect(),
        };
        let path = self.dir.join("summary.json");
        write_json(&path, &summary)?;
        Ok(path)
    }
}

/// Directory name for a task id; characters outside `[A-Za-z0-9._-]` become `_`.
///
/// An id that had to be rewritten gets the first 8 hex digits of its SHA-256 appended.
pub fn task_dir_name(task_id: &str) -> String {
    let safe: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == task_id && !matches!(safe.as_str(), "" | "." | "..") {
        return safe;
    }
    let digest = hex::encode(Sha256::digest(task_id.as_bytes()));
    format!("{safe}-{}", &digest[..8])
}

/// `<UTC timestamp>_<6 random lowercase alphanumerics>`.
pub fn generate_run_id() -> String {
    format!("{}_{}", generate_timestamp(), generate_short_id())
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}
