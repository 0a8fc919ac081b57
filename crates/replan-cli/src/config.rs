//! Configuration file management for replan.
//!
//! Provides a TOML-based config file at `~/.config/replan/config.toml` and a
//! resolution chain: CLI flag > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use replan_core::{AnalyzerConfig, ScriptRunnerConfig};

/// Label selector used when the config file and CLI are silent, matching
/// the Jakarta-migration rulesets the analyzer ships with.
pub const DEFAULT_LABEL_SELECTOR: &str =
    "konveyor.io/target=quarkus konveyor.io/target=jakarta-ee";

const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 600;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub analyzer: AnalyzerSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub runner: Option<RunnerSection>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnalyzerSection {
    /// The analyzer JSON-RPC server binary.
    pub server_binary: PathBuf,
    /// Directory holding the migration rulesets.
    pub rules_directory: PathBuf,
    /// Language-server binary the analyzer delegates to.
    pub lsp_server_path: PathBuf,
    /// Java bundles for the language server.
    pub java_bundle_path: PathBuf,
    /// Optional open-source dependency label file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_open_source_labels: Option<PathBuf>,
    /// Where the analyzer writes its own log (default `./kai-analyzer.log`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Label selector for analysis passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    /// Per-request timeout in seconds (default 240).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PlannerSection {
    /// Retry budget per task (default 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Fix command executed once per task.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-time limit per invocation in seconds (default 600).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the replan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/replan` or `~/.config/replan`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("replan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("replan")
}

/// Return the path to the replan config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write a config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

/// Write a starter config the operator fills in.
pub fn starter_config() -> ConfigFile {
    ConfigFile {
        analyzer: AnalyzerSection {
            server_binary: PathBuf::from("/usr/local/bin/kai-analyzer-rpc"),
            rules_directory: PathBuf::from("/opt/analyzer/rulesets"),
            lsp_server_path: PathBuf::from("/usr/local/bin/jdtls"),
            java_bundle_path: PathBuf::from("/opt/analyzer/java-analyzer-bundle.jar"),
            dep_open_source_labels: None,
            log_file: None,
            label_selector: Some(DEFAULT_LABEL_SELECTOR.to_string()),
            request_timeout_secs: None,
        },
        planner: PlannerSection::default(),
        runner: None,
    }
}

// -----------------------------------------------------------------------
// Resolution into core config types
// -----------------------------------------------------------------------

impl ConfigFile {
    /// Build the analyzer config for a run over `repo`, applying the CLI's
    /// label-selector override if given.
    pub fn analyzer_config(&self, repo: &Path) -> AnalyzerConfig {
        let section = &self.analyzer;
        let mut config = AnalyzerConfig::new(
            &section.server_binary,
            repo,
            &section.rules_directory,
            &section.lsp_server_path,
            &section.java_bundle_path,
        );
        config.dep_open_source_labels = section.dep_open_source_labels.clone();
        if let Some(log_file) = &section.log_file {
            config.log_file = log_file.clone();
        }
        if let Some(secs) = section.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn label_selector(&self, override_from_cli: Option<&str>) -> String {
        override_from_cli
            .map(str::to_string)
            .or_else(|| self.analyzer.label_selector.clone())
            .unwrap_or_else(|| DEFAULT_LABEL_SELECTOR.to_string())
    }

    /// Build the fix-runner config; `resolve` requires a `[runner]` section.
    pub fn runner_config(&self) -> Result<ScriptRunnerConfig> {
        let Some(section) = &self.runner else {
            bail!("config file has no [runner] section; `replan resolve` needs a fix command");
        };
        Ok(ScriptRunnerConfig {
            command: section.command.clone(),
            args: section.args.clone(),
            timeout: Duration::from_secs(
                section.timeout_secs.unwrap_or(DEFAULT_RUNNER_TIMEOUT_SECS),
            ),
        })
    }
}
