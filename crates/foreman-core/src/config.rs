//! Layered configuration for the orchestrator core.
//!
//! Loaded from an optional YAML file, then overridden by environment
//! variables, then by CLI flags (applied by `foreman-cli`) — the same
//! file-then-env-then-flags precedence the upstream config format uses for
//! its v1/v2 field normalization.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForemanConfig {
    /// Root directory for persisted jobs/runs/pidfiles (spec.md §4.7).
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Directory under which per-run git worktrees are created.
    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: String,

    /// HTTP port for the Job/Run Service.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional secondary port (spec.md §4.8), used when the daemon needs
    /// to expose a second listener (e.g. a loopback-only admin surface).
    #[serde(default)]
    pub secondary_port: Option<u16>,

    /// Path to the git repository this orchestrator owns.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// `providerID/modelID` for the worker phase.
    #[serde(default = "default_worker_model")]
    pub worker_model: String,

    /// `providerID/modelID` for the boss phase.
    #[serde(default = "default_boss_model")]
    pub boss_model: String,

    /// Maximum worker/boss iterations per run (spec.md §4.6).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Session Transport default timeout, in seconds (spec.md §4.2).
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Resolver sub-loop bound (spec.md §4.5).
    #[serde(default = "default_resolver_max_iterations")]
    pub resolver_max_iterations: u32,

    /// Conflict-resolution retry bound in the orchestrator (spec.md §4.6 step 4).
    #[serde(default = "default_merge_retry_max")]
    pub merge_retry_max: u32,

    /// Command used to spawn the external agent-server process (spec.md §4.4,
    /// §1 "Explicitly out of scope"). The binary itself is an external
    /// collaborator; only its invocation is configured here.
    #[serde(default = "default_agent_server_command")]
    pub agent_server_command: String,

    /// First port handed out to an Agent Server Handle; each handle acquired
    /// by the daemon takes the next free port above this one.
    #[serde(default = "default_agent_server_base_port")]
    pub agent_server_base_port: u16,
}

fn default_prefix() -> String {
    ".foreman".to_string()
}
fn default_worktrees_dir() -> String {
    ".foreman/worktrees".to_string()
}
fn default_port() -> u16 {
    4178
}
fn default_workspace() -> String {
    ".".to_string()
}
fn default_worker_model() -> String {
    "anthropic/claude-sonnet-4-5".to_string()
}
fn default_boss_model() -> String {
    "anthropic/claude-sonnet-4-5".to_string()
}
fn default_max_iterations() -> u32 {
    50
}
fn default_session_timeout_secs() -> u64 {
    1800
}
fn default_resolver_max_iterations() -> u32 {
    4
}
fn default_merge_retry_max() -> u32 {
    3
}
fn default_agent_server_command() -> String {
    "agent-server".to_string()
}
fn default_agent_server_base_port() -> u16 {
    9100
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            worktrees_dir: default_worktrees_dir(),
            port: default_port(),
            secondary_port: None,
            workspace: default_workspace(),
            worker_model: default_worker_model(),
            boss_model: default_boss_model(),
            max_iterations: default_max_iterations(),
            session_timeout_secs: default_session_timeout_secs(),
            resolver_max_iterations: default_resolver_max_iterations(),
            merge_retry_max: default_merge_retry_max(),
            agent_server_command: default_agent_server_command(),
            agent_server_base_port: default_agent_server_base_port(),
        }
    }
}

impl ForemanConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        debug!(port = config.port, workspace = %config.workspace, "configuration loaded");
        Ok(config)
    }

    /// Applies environment-variable overrides. Unset variables leave the
    /// existing value untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FOREMAN_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var("FOREMAN_WORKSPACE") {
            self.workspace = v;
        }
        if let Ok(v) = std::env::var("FOREMAN_PREFIX") {
            self.prefix = v;
        }
        if let Ok(v) = std::env::var("FOREMAN_AGENT_SERVER_COMMAND") {
            self.agent_server_command = v;
        }
        if let Ok(v) = std::env::var("FOREMAN_AGENT_SERVER_BASE_PORT") {
            if let Ok(port) = v.parse() {
                self.agent_server_base_port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "workspace".to_string(),
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_iterations".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
