//! Engine configuration
//!
//! Controls the spawned agent invocation, concurrency bound, deadlines, and
//! the dangerous-action deny-list extension.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the agent executable path
pub const AGENT_BIN_ENV: &str = "ACE_AGENT_BIN";

/// How the agent process is asked to shape its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Structured-output mode (`--json`)
    Json,
    /// Conversational mode (`--interactive`)
    Interactive,
}

impl OutputMode {
    /// The command-line flag selecting this mode
    #[must_use]
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Json => "--json",
            Self::Interactive => "--interactive",
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the agent executable
    pub executable: PathBuf,
    /// Output shaping mode
    pub output_mode: OutputMode,
    /// Model identifier passed as `--model <id>`
    pub model: Option<String>,
    /// Ask the agent to emit confirmation prompts before acting
    pub confirm_actions: bool,
    /// Maximum concurrently running operations; excess queue FIFO
    pub max_concurrency: usize,
    /// Hard wall-clock timeout per spawned process
    pub operation_timeout: Duration,
    /// Sub-timeout for one approval round trip
    pub approval_timeout: Duration,
    /// Timeout for each credential resolution tier
    pub credential_tier_timeout: Duration,
    /// Extra dangerous-action substrings merged into the default deny-list
    pub extra_deny_patterns: Vec<String>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with the executable path taken from the
    /// `ACE_AGENT_BIN` environment variable when set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(AGENT_BIN_ENV) {
            config.executable = PathBuf::from(path);
        }
        config
    }

    /// With an explicit executable path
    #[inline]
    #[must_use]
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = path.into();
        self
    }

    /// With an output mode
    #[inline]
    #[must_use]
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// With a model id
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// With a concurrency bound
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// With a per-process hard timeout
    #[inline]
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// With an approval sub-timeout
    #[inline]
    #[must_use]
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// With extra deny-list substrings
    #[inline]
    #[must_use]
    pub fn with_deny_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_deny_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// The argv the supervisor builds from this configuration.
    ///
    /// Credentials and correlation ids are never part of argv; they travel
    /// through the process environment.
    #[must_use]
    pub fn agent_args(&self) -> Vec<String> {
        let mut args = vec![self.output_mode.flag().to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.confirm_actions {
            args.push("--confirm-actions".to_string());
        }
        args
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("agent"),
            output_mode: OutputMode::Json,
            model: None,
            confirm_actions: true,
            max_concurrency: 4,
            operation_timeout: Duration::from_secs(120),
            approval_timeout: Duration::from_secs(30),
            credential_tier_timeout: Duration::from_secs(10),
            extra_deny_patterns: Vec::new(),
        }
    }
}
