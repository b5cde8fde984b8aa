//! Error types for the weft workflow engine.
//!
//! Build-time problems surface as [`DefinitionError`]. Everything that can go wrong while
//! a workflow runs is an [`EngineError`] carried inside the invocation's result, with the
//! originating typed error kept as its source.

use crate::context::ValueKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Context lookup, typing, and template errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Context key not found: {0}")]
    MissingKey(String),

    #[error("Context key '{key}' holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Malformed template: {0}")]
    MalformedTemplate(String),

    #[error("Evaluator '{unit}' did not set approval key '{key}'")]
    MissingApproval { unit: String, key: String },

    #[error("Dovetail '{name}' missing outputs: {missing:?}")]
    MissingDovetailOutput { name: String, missing: Vec<String> },
}

/// Failures of the external resource injectors (files, env, functions)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("Failed to read file {path:?}: {message}")]
    File { path: PathBuf, message: String },

    #[error("Environment variable not set: {0}")]
    MissingEnv(String),

    #[error("Function not registered: {0}")]
    UnknownFunction(String),

    #[error("Function '{name}' failed: {message}")]
    Function { name: String, message: String },
}

/// Failures reported by (or on behalf of) the generation collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed generation response: {0}")]
    Malformed(String),

    #[error("Generation capacity rejected: {0}")]
    CapacityRejected(String),

    #[error("Generation backend failed: {0}")]
    Backend(String),

    #[error("Scripted backend has no response left for '{0}'")]
    ScriptExhausted(String),
}

/// Resume called against a paused state this definition cannot continue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeError {
    #[error("Suspension belongs to a different {kind} (expected {expected}, got {actual})")]
    ForeignDefinition {
        kind: &'static str,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("Step {step_index} is not the paused human input step")]
    StaleStep { step_index: usize },

    #[error("Context version mismatch: paused at {expected}, got {actual}")]
    ContextVersion { expected: u64, actual: u64 },

    #[error("Paused context was modified after suspension")]
    ContextDigest,

    #[error("Answer '{answer}' is not one of {choices:?}")]
    AnswerNotAllowed { answer: String, choices: Vec<String> },

    #[error("Suspension shape does not match this {0}")]
    ShapeMismatch(&'static str),
}

/// Rejections raised while building definitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Template in '{config}' references undeclared key '{key}'")]
    UndeclaredPlaceholder { config: String, key: String },

    #[error("Malformed template in '{config}': {message}")]
    MalformedTemplate { config: String, message: String },

    #[error("Default for '{key}' in '{config}' is {found}, declared {expected}")]
    DefaultKindMismatch {
        config: String,
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Refinement loop '{0}' needs a positive iteration budget")]
    ZeroIterations(String),

    #[error("{0} name cannot be empty")]
    EmptyName(&'static str),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("Cycle detected through node: {0}")]
    Cycle(String),

    #[error("Invalid workflow spec: {0}")]
    InvalidSpec(String),

    #[error("Failed to read workflow spec {path:?}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Invocation-level error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Resource resolution failed: {0}")]
    ResourceResolution(#[from] ResourceError),

    #[error("Generation failed in '{config}': {cause}")]
    Generation {
        config: String,
        #[source]
        cause: GenerationError,
    },

    #[error("Resume mismatch: {0}")]
    ResumeMismatch(#[from] ResumeError),

    #[error("Invocation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Stable short name for events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Context(_) => "context",
            EngineError::ResourceResolution(_) => "resource_resolution",
            EngineError::Generation { .. } => "generation",
            EngineError::ResumeMismatch(_) => "resume_mismatch",
            EngineError::Cancelled => "cancelled",
        }
    }
}

/// Configuration and logging setup errors
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for SetupError {
    fn from(err: config::ConfigError) -> Self {
        SetupError::Config(err.to_string())
    }
}
