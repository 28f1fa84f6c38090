//! CLI tests for the `devloop` binary.
//!
//! Spawns the binary and checks exit codes for valid, invalid and abandoned
//! runs.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use devloop::exit_codes;

fn devloop(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devloop"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn devloop")
}

const VALID: &str = r#"{
    "root": [
        {"task_id": "FEAT-1", "task_type": "feature_implementation", "task_description": "f", "task_dependencies": ["SC-1"]},
        {"task_id": "SC-1", "task_type": "STRUCT", "task_description": "s", "task_dependencies": []}
    ]
}"#;

const CYCLIC: &str = r#"[
    {"id": "A", "type": "doc", "description": "a", "dependencies": ["B"]},
    {"id": "B", "type": "doc", "description": "b", "dependencies": ["A"]}
]"#;

#[test]
fn validate_prints_execution_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("backlog.json"), VALID).expect("write");

    let out = devloop(temp.path(), &["validate", "backlog.json"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout, "1. SC-1 (scaffold)\n2. FEAT-1 (feature)\n");
}

#[test]
fn validate_rejects_cycles() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("backlog.json"), CYCLIC).expect("write");

    let out = devloop(temp.path(), &["validate", "backlog.json"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("A -> B -> A"));
}

#[test]
fn tools_prints_catalog() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = devloop(temp.path(), &["tools"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let catalog: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    let names: Vec<&str> = catalog
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t["function"]["name"].as_str())
        .collect();
    for expected in [
        "read_file",
        "write_file",
        "create_file",
        "create_directory",
        "list_directory",
        "edit_file",
        "run_npm",
        "run_pip",
    ] {
        assert!(names.contains(&expected), "missing {expected}");
    }
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("devloop.toml"), "max_retries = 0\n").expect("write");
    let out = devloop(temp.path(), &["tools"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
mod run {
    use super::*;

    const SINGLE_TASK: &str =
        r#"[{"id": "DOC-1", "type": "doc", "description": "Write a README", "acceptance_criteria": ["README.md exists"]}]"#;

    const GENERATOR: &str = r#"cat > /dev/null
echo '{"content": "Writing the README.", "tool_calls": [{"name": "write_file", "arguments": {"path": "README.md", "content": "hi"}}]}'
"#;

    fn setup(verifier: &str) -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("backlog.json"), SINGLE_TASK).expect("write backlog");
        let script = temp.path().join("generator.sh");
        fs::write(&script, GENERATOR).expect("write generator");
        let config = format!(
            "max_retries = 2\nrefresh_listing = false\n\n[generator]\ncommand = [\"sh\", \"{}\"]\n\n[verifier]\nkind = \"command\"\ncommand = {verifier}\n",
            script.display()
        );
        fs::write(temp.path().join("devloop.toml"), config).expect("write config");
        temp
    }

    #[test]
    fn passing_run_exits_ok_and_writes_log() {
        let temp = setup(r#"["test", "-f", "README.md"]"#);
        let out = devloop(temp.path(), &["run", "backlog.json"]);
        let stdout = String::from_utf8_lossy(&out.stdout);
        assert_eq!(out.status.code(), Some(exit_codes::OK), "{stdout}");
        assert!(stdout.contains("DOC-1: passed after 1 attempt(s)"));

        assert_eq!(
            fs::read_to_string(temp.path().join("output/README.md")).expect("readme"),
            "hi"
        );
        let runs: Vec<_> = fs::read_dir(temp.path().join(".devloop/runs"))
            .expect("runs dir")
            .collect();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn abandoned_run_exits_with_abandoned_code() {
        let temp = setup(r#"["false"]"#);
        let out = devloop(temp.path(), &["run", "backlog.json"]);
        assert_eq!(out.status.code(), Some(exit_codes::ABANDONED));
        assert!(String::from_utf8_lossy(&out.stdout).contains("DOC-1: abandoned after 2 attempt(s)"));
    }

    #[test]
    fn state_dir_inside_workspace_is_invalid() {
        let temp = setup(r#"["true"]"#);
        let out = devloop(
            temp.path(),
            &["run", "backlog.json", "--state-dir", "output/.devloop"],
        );
        assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    }
}
