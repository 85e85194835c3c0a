//! Configuration loading for patchloop.
//!
//! Configuration comes from a YAML file (`patchloop.yml` by default), then
//! environment overrides, then CLI flags. Every section has working
//! defaults so an empty or missing file is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment variable {key}={value:?} is not a valid value")]
    InvalidEnv { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchloopConfig {
    pub projects: ProjectsConfig,

    #[serde(rename = "loop")]
    pub repair_loop: LoopConfig,

    pub harness: HarnessConfig,

    pub oracle: OracleConfig,

    pub context: ContextConfig,

    pub telemetry: TelemetryConfig,
}

/// Where projects live and what makes a directory a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    pub root: PathBuf,
    /// Specification document every project must contain.
    pub spec_file: String,
    /// Directory names that mark a test suite.
    pub test_markers: Vec<String>,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("projects"),
            spec_file: "README.md".to_string(),
            test_markers: vec!["tests".to_string()],
        }
    }
}

/// Retry bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Failed validations allowed before a project is marked Failed.
    pub max_iterations: u32,
    /// Iterations' worth of failure records fed back to the oracle.
    pub error_history_iterations: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            error_history_iterations: 4,
        }
    }
}

/// How tests are run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Shell command run in the project root.
    pub command: String,
    pub timeout_secs: u64,
    /// Per-project command overrides, keyed by project directory name.
    pub overrides: BTreeMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            command: "pytest -q".to_string(),
            timeout_secs: 240,
            overrides: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Test command for the project named `project`.
    pub fn command_for(&self, project: &str) -> &str {
        self.overrides
            .get(project)
            .map_or(self.command.as_str(), String::as_str)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which oracle adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    /// OpenAI-compatible chat completions endpoint.
    #[default]
    OpenAi,
    /// External command reading the context on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    pub model: String,
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// argv for the command backend.
    pub command: Vec<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackend::OpenAi,
            model: "gpt-4.1-mini".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            request_timeout_secs: 300,
            command: Vec::new(),
        }
    }
}

impl OracleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Limits for the context document sent to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_file_chars: usize,
    pub max_total_chars: usize,
    pub max_test_output_chars: usize,
    pub max_tree_entries: usize,
    /// File extensions considered source text.
    pub extensions: Vec<String>,
    /// Directory names never listed or excerpted.
    pub skip_dirs: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let extensions = [
            "py", "js", "ts", "tsx", "jsx", "java", "go", "rs", "rb", "php", "kt", "swift", "c",
            "h", "cpp", "md", "toml", "yaml", "yml", "cfg", "ini", "txt",
        ];
        let skip_dirs = [
            ".git",
            ".venv",
            "venv",
            "node_modules",
            "__pycache__",
            ".pytest_cache",
            "dist",
            "build",
            "target",
        ];
        Self {
            max_file_chars: 4000,
            max_total_chars: 40_000,
            max_test_output_chars: 6000,
            max_tree_entries: 400,
            extensions: extensions.iter().map(ToString::to_string).collect(),
            skip_dirs: skip_dirs.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Directory holding `usage.jsonl`.
    pub run_dir: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_dir: PathBuf::from(".agent_runs"),
        }
    }
}

impl PatchloopConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&content)
    }

    /// Parses configuration from YAML text. Empty text yields defaults.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies the process environment on top of the file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`.
    ///
    /// Recognised keys: `PROJECTS_ROOT`, `MAX_AGENT_ITERS`,
    /// `TEST_TIMEOUT_SECS`, `OPENAI_MODEL`, `OPENAI_API_BASE`, `AGENT_RUN_DIR`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("PROJECTS_ROOT") {
            self.projects.root = PathBuf::from(root);
        }
        if let Some(value) = lookup("MAX_AGENT_ITERS") {
            self.repair_loop.max_iterations = parse_env("MAX_AGENT_ITERS", &value)?;
        }
        if let Some(value) = lookup("TEST_TIMEOUT_SECS") {
            self.harness.timeout_secs = parse_env("TEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.oracle.model = model;
        }
        if let Some(base) = lookup("OPENAI_API_BASE") {
            self.oracle.api_base = base;
        }
        if let Some(dir) = lookup("AGENT_RUN_DIR") {
            self.telemetry.run_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Rejects values that would break the loop's termination or the
    /// harness contract.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repair_loop.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "loop.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.repair_loop.error_history_iterations == 0 {
            return Err(ConfigError::Invalid(
                "loop.error_history_iterations must be at least 1".to_string(),
            ));
        }
        if self.harness.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "harness.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.harness.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "harness.command must not be empty".to_string(),
            ));
        }
        if let Some((name, _)) = self
            .harness
            .overrides
            .iter()
            .find(|(_, cmd)| cmd.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "harness.overrides.{name} must not be empty"
            )));
        }
        if self.oracle.backend == OracleBackend::Command && self.oracle.command.is_empty() {
            return Err(ConfigError::Invalid(
                "oracle.command is required when oracle.backend is `command`".to_string(),
            ));
        }
        if self.projects.spec_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "projects.spec_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
