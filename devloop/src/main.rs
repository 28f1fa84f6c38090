//! Verification-gated task execution over a sandboxed workspace.
//!
//! Loads a backlog, orders it by dependency and runs each task through the
//! generate / act / verify loop, writing a run log under the state directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use devloop::core::sandbox::PathSandbox;
use devloop::engine::{Engine, EngineSettings, TaskReport};
use devloop::exit_codes;
use devloop::io::backlog_store::load_backlog;
use devloop::io::config::{EngineConfig, VerifierKind, load_config};
use devloop::io::generator::CommandGenerator;
use devloop::io::run_log::RunLog;
use devloop::io::verifier::{CommandVerifier, ModelVerifier, Verifier};
use devloop::io::workspace::open_workspace;
use devloop::logging;
use devloop::tools::standard_registry;

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Verification-gated task execution engine"
)]
struct Cli {
    /// Engine config (TOML). Defaults apply if the file is missing.
    #[arg(long, global = true, default_value = "devloop.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tool catalog offered to the generation service as JSON.
    Tools,
    /// Check a backlog file and print its execution order.
    Validate {
        backlog: PathBuf,
    },
    /// Run every task of a backlog against the workspace.
    Run {
        backlog: PathBuf,
        /// Workspace root; created if absent.
        #[arg(long, default_value = "output")]
        workspace: PathBuf,
        /// Where run logs are written. Must be outside the workspace.
        #[arg(long, default_value = ".devloop")]
        state_dir: PathBuf,
        /// Override `max_retries` from the config.
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Tools => cmd_tools(&cfg),
        Command::Validate { backlog } => cmd_validate(&backlog),
        Command::Run {
            backlog,
            workspace,
            state_dir,
            max_retries,
        } => {
            if let Some(max_retries) = max_retries {
                cfg.max_retries = max_retries;
                cfg.validate().context("--max-retries")?;
            }
            cmd_run(&cfg, &backlog, &workspace, &state_dir)
        }
    }
}

fn cmd_tools(cfg: &EngineConfig) -> Result<i32> {
    // The catalog does not depend on the root.
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let registry = standard_registry(&PathSandbox::new(cwd)?, &cfg.tools)?;
    let catalog = serde_json::to_string_pretty(&registry.list()).context("serialize catalog")?;
    println!("{catalog}");
    Ok(exit_codes::OK)
}

fn cmd_validate(backlog_path: &Path) -> Result<i32> {
    let backlog = load_backlog(backlog_path)?;
    for (i, task) in backlog.tasks().iter().enumerate() {
        println!("{}. {} ({})", i + 1, task.id, task.task_type.as_str());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    cfg: &EngineConfig,
    backlog_path: &Path,
    workspace: &Path,
    state_dir: &Path,
) -> Result<i32> {
    let backlog = load_backlog(backlog_path)?;
    let sandbox = open_workspace(workspace)?;
    let state_dir = prepare_state_dir(state_dir, &sandbox)?;
    let registry = standard_registry(&sandbox, &cfg.tools)?;
    let generator = CommandGenerator::new(&cfg.generator)?;
    let verifier: Box<dyn Verifier + '_> = match cfg.verifier.kind {
        VerifierKind::Model => Box::new(ModelVerifier::new(&generator, cfg)?),
        VerifierKind::Command => Box::new(CommandVerifier::new(&cfg.verifier, sandbox.root())),
    };

    let run_log = RunLog::create(&state_dir, backlog_path, &backlog)?;
    println!("run {} ({} task(s))", run_log.run_id(), backlog.len());

    let engine = Engine::new(
        &generator,
        verifier.as_ref(),
        &registry,
        &sandbox,
        EngineSettings::from_config(cfg),
    )?
    .with_stream_dir(run_log.dir());

    let report = engine.run_backlog(&backlog, |task| {
        println!("{}", task_line(task));
        run_log.record_task(task).map(|_| ())
    })?;
    let summary = run_log.finish(&report)?;

    println!(
        "{} passed, {} abandoned; log: {}",
        report.passed_count(),
        report.abandoned_count(),
        summary.display()
    );
    Ok(if report.all_passed() {
        exit_codes::OK
    } else {
        exit_codes::ABANDONED
    })
}

fn task_line(task: &TaskReport) -> String {
    format!(
        "{}: {} after {} attempt(s)",
        task.task_id,
        task.final_state.as_str(),
        task.attempts_used()
    )
}

/// Create the state directory and refuse one inside the workspace.
fn prepare_state_dir(state_dir: &Path, sandbox: &PathSandbox) -> Result<PathBuf> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("create state dir {}", state_dir.display()))?;
    let resolved = fs::canonicalize(state_dir)
        .with_context(|| format!("resolve state dir {}", state_dir.display()))?;
    if resolved.starts_with(sandbox.root()) {
        bail!(
            "state dir {} must be outside the workspace {}",
            resolved.display(),
            sandbox.root().display()
        );
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["devloop", "run", "backlog.json"]);
        assert_eq!(cli.config, PathBuf::from("devloop.toml"));
        match cli.command {
            Command::Run {
                backlog,
                workspace,
                state_dir,
                max_retries,
            } => {
                assert_eq!(backlog, PathBuf::from("backlog.json"));
                assert_eq!(workspace, PathBuf::from("output"));
                assert_eq!(state_dir, PathBuf::from(".devloop"));
                assert_eq!(max_retries, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["devloop", "validate", "b.json", "--config", "alt.toml"]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        assert!(matches!(cli.command, Command::Validate { .. }));
    }

    #[test]
    fn state_dir_inside_workspace_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = open_workspace(&temp.path().join("output")).expect("workspace");
        let err = prepare_state_dir(&temp.path().join("output/.devloop"), &sandbox).unwrap_err();
        assert!(err.to_string().contains("outside the workspace"));
        assert!(prepare_state_dir(&temp.path().join(".devloop"), &sandbox).is_ok());
    }
}
