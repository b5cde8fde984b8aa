//! Configuration System
//!
//! Layered engine configuration: built-in defaults, then the global file, then the
//! workspace files, then `WEFT__SECTION__KEY` environment variables. Tests included.

use crate::error::SetupError;
use crate::logging::LoggingConfig;
use crate::refinement::{DEFAULT_APPROVAL_KEY, DEFAULT_FEEDBACK_KEY, DEFAULT_ITERATION_KEY};
use config::Environment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

mod merge;
mod sources;

pub use merge::merge_policy::DEFAULT_MAX_ITERATIONS;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution settings applied to every `Runtime` built from this config
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-call generation deadline; unset means no deadline
    #[serde(default)]
    pub generation_timeout_secs: Option<u64>,

    /// Iteration budget for loop specs that do not name one
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,

    #[serde(default = "default_approval_key")]
    pub approval_key: String,

    #[serde(default = "default_feedback_key")]
    pub feedback_key: String,

    #[serde(default = "default_iteration_key")]
    pub iteration_key: String,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_approval_key() -> String {
    DEFAULT_APPROVAL_KEY.to_string()
}

fn default_feedback_key() -> String {
    DEFAULT_FEEDBACK_KEY.to_string()
}

fn default_iteration_key() -> String {
    DEFAULT_ITERATION_KEY.to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            generation_timeout_secs: None,
            default_max_iterations: default_max_iterations(),
            approval_key: default_approval_key(),
            feedback_key: default_feedback_key(),
            iteration_key: default_iteration_key(),
        }
    }
}

impl RuntimeConfig {
    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.default_max_iterations == 0 {
            problems.push("default_max_iterations must be positive".to_string());
        }
        if self.generation_timeout_secs == Some(0) {
            problems.push("generation_timeout_secs must be positive when set".to_string());
        }
        let keys = [
            ("approval_key", &self.approval_key),
            ("feedback_key", &self.feedback_key),
            ("iteration_key", &self.iteration_key),
        ];
        for (field, key) in keys {
            if key.trim().is_empty() {
                problems.push(format!("{} cannot be empty", field));
            }
        }
        for (i, (first, a)) in keys.iter().enumerate() {
            for (second, b) in &keys[i + 1..] {
                if a == b && !a.trim().is_empty() {
                    problems.push(format!("{} and {} must differ (both '{}')", first, second, a));
                }
            }
        }
        problems
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Runtime(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Runtime(msg) => write!(f, "runtime: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl EngineConfig {
    /// Validate the entire configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = self
            .runtime
            .validate()
            .into_iter()
            .map(ValidationError::Runtime)
            .chain(self.logging.validate().into_iter().map(ValidationError::Logging))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads `EngineConfig` from every layer.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load using the global file under the user's config home.
    pub fn load(workspace_root: &Path) -> Result<EngineConfig, SetupError> {
        Self::load_from(workspace_root, global_config_path().as_deref())
    }

    /// Load with an explicit global file (or none).
    pub fn load_from(
        workspace_root: &Path,
        global_file: Option<&Path>,
    ) -> Result<EngineConfig, SetupError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder, global_file);
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root);
        let builder = builder.add_source(
            Environment::with_prefix("WEFT")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        debug!(workspace_root = %workspace_root.display(), "configuration loaded");
        Ok(config)
    }

    /// Load, then reject the result if validation finds any problem.
    pub fn load_validated(workspace_root: &Path) -> Result<EngineConfig, SetupError> {
        let config = Self::load(workspace_root)?;
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            SetupError::Config(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }
}
