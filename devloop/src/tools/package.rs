//! Package-manager tools: a constrained npm/npx runner and a pip runner.
//!
//! Commands run in the sandbox root with a timeout. Output, including a
//! non-zero exit, is returned as tool content.

use std::process::Command;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::core::sandbox::PathSandbox;
use crate::io::config::ToolsConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::tools::{ParamKind, ParamSpec, Tool, ToolError, ToolSpec, str_arg};

/// Sub-commands that start long-running processes or publish artifacts.
pub const NPM_DENYLIST: &[&str] = &[
    "start", "dev", "serve", "publish", "prod", "deploy", "exec", "restart",
];

/// Sub-commands and flags that make npm write outside the project root.
const NPM_OUTSIDE_ROOT: &[&str] = &["link", "ln", "-g", "--global", "-C", "--prefix", "--location"];

const PIP_COMMANDS: &[&str] = &["install", "freeze"];

/// True when `token`, or the value of a `--flag=value` token, names a path outside the root.
fn names_outside_path(token: &str) -> bool {
    let value = token.split_once('=').map_or(token, |(_, v)| v);
    [token, value].into_iter().any(|t| {
        let t = t.strip_prefix("file:").unwrap_or(t);
        t.starts_with('/')
            || t.starts_with('\\')
            || t.starts_with('~')
            || t.as_bytes().get(1) == Some(&b':')
            || t.split(['/', '\\']).any(|seg| seg == "..")
    })
}

/// True when an npm token would install or link outside the project root.
fn npm_leaves_root(token: &str) -> bool {
    let flag = token.split_once('=').map_or(token, |(f, _)| f);
    NPM_OUTSIDE_ROOT.contains(&flag) || names_outside_path(token)
}

/// Settings shared by both package tools.
#[derive(Debug, Clone)]
struct Runner {
    sandbox: PathSandbox,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Runner {
    fn new(sandbox: PathSandbox, cfg: &ToolsConfig) -> Self {
        Self {
            sandbox,
            timeout: Duration::from_secs(cfg.package_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn run(&self, label: &str, program: &str, args: &[String]) -> Result<String, ToolError> {
        let shown = std::iter::once(label.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        info!(command = %shown, "running package manager");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(self.sandbox.root());
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .map_err(|err| ToolError::CommandFailed {
                command: shown.clone(),
                reason: format!("{err:#}"),
            })?;

        if output.timed_out {
            warn!(command = %shown, "package manager timed out");
            return Err(ToolError::CommandFailed {
                command: shown,
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            });
        }
        Ok(render_output(label, &output))
    }
}

fn render_output(label: &str, output: &CommandOutput) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut out = format!("{label} output:\n{}", stdout.trim_end());
    out.push_str(&output.stdout_truncated_notice(label));
    if !stderr.trim().is_empty() || output.stderr_truncated > 0 {
        out.push_str(&format!("\n{label} errors:\n{}", stderr.trim_end()));
        out.push_str(&output.stderr_truncated_notice(label));
    }
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        out.push_str(&format!("\n[{label} exited with status {code}]"));
    }
    out
}

/// npm and npx are batch files on Windows.
fn node_program(program: &str) -> String {
    if cfg!(windows) && !program.ends_with(".cmd") {
        format!("{program}.cmd")
    } else {
        program.to_string()
    }
}

pub struct NpmTool {
    runner: Runner,
    npm_program: String,
    npx_program: String,
}

impl NpmTool {
    pub fn new(sandbox: PathSandbox, cfg: &ToolsConfig) -> Self {
        Self {
            runner: Runner::new(sandbox, cfg),
            npm_program: node_program(&cfg.npm_program),
            npx_program: node_program(&cfg.npx_program),
        }
    }
}

impl Tool for NpmTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_npm",
            description: "Run an npm or npx command in the project root (e.g. 'npm install', 'npm run build', 'npx create-vite app'). Commands that start servers or publish are rejected.",
            params: vec![ParamSpec::required(
                "command",
                ParamKind::String,
                "Full command line starting with npm or npx.",
            )],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let command = str_arg(args, "command").unwrap_or_default();
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let (label, program) = match tokens.first() {
            Some(&"npm") => ("npm", &self.npm_program),
            Some(&"npx") => ("npx", &self.npx_program),
            _ => {
                return Err(ToolError::InvalidArguments {
                    tool: "run_npm".to_string(),
                    reason: "command must start with npm or npx".to_string(),
                });
            }
        };

        let rest: Vec<String> = tokens[1..].iter().map(|t| (*t).to_string()).collect();
        if let Some(denied) = rest.iter().find(|t| {
            NPM_DENYLIST.contains(&t.to_lowercase().as_str()) || npm_leaves_root(t)
        }) {
            warn!(command, denied = %denied, "blocked package command");
            return Err(ToolError::Blocked {
                command: command.trim().to_string(),
            });
        }

        self.runner.run(label, program, &rest)
    }
}

pub struct PipTool {
    runner: Runner,
    pip_program: String,
}

impl PipTool {
    pub fn new(sandbox: PathSandbox, cfg: &ToolsConfig) -> Self {
        Self {
            runner: Runner::new(sandbox, cfg),
            pip_program: cfg.pip_program.clone(),
        }
    }
}

impl Tool for PipTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_pip",
            description: "Run pip in the project root. Only 'install' and 'freeze' are allowed.",
            params: vec![
                ParamSpec::required("command", ParamKind::String, "pip command to run.")
                    .one_of(PIP_COMMANDS),
                ParamSpec::optional(
                    "packages",
                    ParamKind::String,
                    "Space-separated package specifiers for install.",
                ),
            ],
        }
    }

    fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let command = str_arg(args, "command").unwrap_or_default();
        if !PIP_COMMANDS.contains(&command) {
            return Err(ToolError::Blocked {
                command: format!("pip {command}"),
            });
        }
        let mut argv = vec![command.to_string()];
        if command == "install" {
            let packages: Vec<String> = str_arg(args, "packages")
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            if packages.is_empty() {
                return Err(ToolError::InvalidArguments {
                    tool: "run_pip".to_string(),
                    reason: "install requires at least one package".to_string(),
                });
            }
            if let Some(denied) = packages
                .iter()
                .find(|p| p.starts_with('-') || names_outside_path(p))
            {
                warn!(packages = %packages.join(" "), denied = %denied, "blocked pip install");
                return Err(ToolError::Blocked {
                    command: format!("pip install {}", packages.join(" ")),
                });
            }
            argv.extend(packages);
        }
        self.runner.run("pip", &self.pip_program, &argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sandbox(temp: &tempfile::TempDir) -> PathSandbox {
        PathSandbox::new(temp.path()).expect("sandbox")
    }

    /// `echo` stands in for the package manager so tests need no toolchain.
    fn echo_config() -> ToolsConfig {
        ToolsConfig {
            npm_program: "echo".to_string(),
            npx_program: "echo".to_string(),
            pip_program: "echo".to_string(),
            ..ToolsConfig::default()
        }
    }

    #[test]
    fn denylisted_subcommands_are_blocked_before_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = NpmTool::new(sandbox(&temp), &echo_config());
        for command in ["npm start", "npm run dev", "npx serve", "npm PUBLISH", "npm run prod"] {
            let err = tool.execute(&args(json!({"command": command}))).unwrap_err();
            assert!(matches!(err, ToolError::Blocked { .. }), "{command}");
        }
    }

    #[test]
    fn npm_cannot_install_or_link_outside_the_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = NpmTool::new(sandbox(&temp), &echo_config());
        for command in [
            "npm install -g x",
            "npm i --global x",
            "npm i --prefix=/etc x",
            "npm i --prefix /etc x",
            "npm link",
            "npm install --location=global x",
            "npm install ../../elsewhere",
            "npm install file:/tmp/pkg",
        ] {
            let err = tool.execute(&args(json!({"command": command}))).unwrap_err();
            assert!(matches!(err, ToolError::Blocked { .. }), "{command}");
        }
    }

    #[test]
    fn pip_flags_and_outside_paths_are_blocked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = PipTool::new(sandbox(&temp), &echo_config());
        for packages in ["--target /tmp/x y", "-e ../..", "../..", "/opt/pkg", "--user flask"] {
            let err = tool
                .execute(&args(json!({"command": "install", "packages": packages})))
                .unwrap_err();
            assert!(matches!(err, ToolError::Blocked { .. }), "{packages}");
        }
    }

    #[test]
    fn non_npm_commands_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = NpmTool::new(sandbox(&temp), &echo_config());
        let err = tool
            .execute(&args(json!({"command": "rm -rf /"})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn npm_output_is_returned_as_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = NpmTool::new(sandbox(&temp), &echo_config());
        let out = tool
            .execute(&args(json!({"command": "npm install --save-dev lodash"})))
            .expect("run");
        assert_eq!(out, "npm output:\ninstall --save-dev lodash");
    }

    #[cfg(unix)]
    #[test]
    fn package_timeout_is_enforced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = ToolsConfig {
            npm_program: "sleep".to_string(),
            package_timeout_secs: 1,
            ..ToolsConfig::default()
        };
        let tool = NpmTool::new(sandbox(&temp), &cfg);
        let err = tool.execute(&args(json!({"command": "npm 5"}))).unwrap_err();
        assert!(
            matches!(err, ToolError::CommandFailed { ref reason, .. } if reason.contains("timed out"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn pip_install_forwards_packages() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = PipTool::new(sandbox(&temp), &echo_config());
        let out = tool
            .execute(&args(json!({"command": "install", "packages": "flask requests"})))
            .expect("run");
        assert_eq!(out, "pip output:\ninstall flask requests");
    }

    #[test]
    fn pip_install_without_packages_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = PipTool::new(sandbox(&temp), &echo_config());
        let err = tool
            .execute(&args(json!({"command": "install"})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
