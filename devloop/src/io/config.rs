//! Engine configuration, read from `devloop.toml` (or `--config`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::sampling::SamplingConfig;

/// Engine configuration (TOML).
///
/// Meant to be edited by hand. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per task before it is abandoned.
    pub max_retries: u32,

    /// Wall-clock bound on a single generation call.
    pub generation_timeout_secs: u64,

    /// Generation cycles per attempt before the verification gate runs.
    pub generation_cycles: u32,

    /// Append a fresh workspace listing before each attempt's directive.
    pub refresh_listing: bool,

    pub listing_max_entries: usize,

    /// Seed each task transcript with a summary of earlier task outcomes.
    pub seed_prior_history: bool,

    pub sampling: SamplingConfig,
    pub tools: ToolsConfig,
    pub generator: GeneratorConfig,
    pub verifier: VerifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub package_timeout_secs: u64,
    /// Truncate captured package-manager stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    pub npm_program: String,
    pub npx_program: String,
    pub pip_program: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            package_timeout_secs: 120,
            output_limit_bytes: 100_000,
            npm_program: "npm".to_string(),
            npx_program: "npx".to_string(),
            pip_program: "pip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command speaking the JSON-over-stdio generation protocol.
    pub command: Vec<String>,
    pub model: String,
    /// Ask for JSON-lines chunks instead of a single response object.
    pub stream: bool,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["ollama-chat".to_string()],
            model: "qwen2.5-coder:14b".to_string(),
            stream: false,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifierKind {
    /// Ask the generation service to judge the transcript.
    Model,
    /// Run a command in the workspace; exit status is the verdict.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifierConfig {
    pub kind: VerifierKind,
    /// Command for `kind = "command"` (e.g. `["just","ci"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub output_limit_bytes: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            kind: VerifierKind::Model,
            command: vec!["just".to_string(), "ci".to_string()],
            timeout_secs: 600,
            temperature: 0.3,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            generation_timeout_secs: 60,
            generation_cycles: 1,
            refresh_listing: true,
            listing_max_entries: 200,
            seed_prior_history: true,
            sampling: SamplingConfig::default(),
            tools: ToolsConfig::default(),
            generator: GeneratorConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.generation_timeout_secs == 0 {
            return Err(anyhow!("generation_timeout_secs must be > 0"));
        }
        if self.generation_cycles == 0 {
            return Err(anyhow!("generation_cycles must be > 0"));
        }
        if self.listing_max_entries == 0 {
            return Err(anyhow!("listing_max_entries must be > 0"));
        }
        self.sampling.validate()?;
        if self.tools.package_timeout_secs == 0 {
            return Err(anyhow!("tools.package_timeout_secs must be > 0"));
        }
        if self.tools.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        if is_blank_command(&self.generator.command) {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.verifier.kind == VerifierKind::Command && is_blank_command(&self.verifier.command)
        {
            return Err(anyhow!("verifier.command must be a non-empty array"));
        }
        if self.verifier.timeout_secs == 0 {
            return Err(anyhow!("verifier.timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.verifier.temperature) {
            return Err(anyhow!("verifier.temperature must be in [0, 2]"));
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn verifier_timeout(&self) -> Duration {
        Duration::from_secs(self.verifier.timeout_secs)
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn serialized_config_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("devloop.toml");
        let cfg = EngineConfig {
            max_retries: 5,
            verifier: VerifierConfig {
                kind: VerifierKind::Command,
                ..VerifierConfig::default()
            },
            ..EngineConfig::default()
        };
        fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize")).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("devloop.toml");
        fs::write(
            &path,
            "max_retries = 2\n\n[sampling]\ntemperature_step = 0.2\n\n[verifier]\nkind = \"command\"\ncommand = [\"make\", \"test\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.sampling.temperature_step, 0.2);
        assert_eq!(cfg.sampling.top_p, 0.1);
        assert_eq!(cfg.verifier.kind, VerifierKind::Command);
        assert_eq!(cfg.verifier.command, vec!["make", "test"]);
        assert_eq!(cfg.generator, GeneratorConfig::default());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("devloop.toml");
        fs::write(&path, "max_retries = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_retries"));
    }
}
