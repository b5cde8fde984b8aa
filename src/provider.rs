//! Generation Backend Abstraction
//!
//! The engine never talks to a model directly. It hands a fully resolved request to a
//! [`GenerationBackend`] and treats the call as a single awaited result. Retry, rate
//! limiting and provider protocol all live behind this trait.

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod scripted;

pub use scripted::{EchoBackend, ScriptedBackend};

/// Resolved request sent to the generation collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Name of the generation config that produced this request
    pub config_name: String,
    pub system_prompt: Option<String>,
    pub goal: String,
    /// JSON schema the structured output must satisfy, if any
    pub output_schema: Option<Value>,
}

/// Output produced by the generation collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    /// Structured output; when present it must be a JSON object whose fields are merged
    /// into the context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl GenerationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    pub fn structured(text: impl Into<String>, structured: Value) -> Self {
        Self {
            text: text.into(),
            structured: Some(structured),
        }
    }
}

/// Generation collaborator trait
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Turn a resolved prompt into output
    async fn invoke(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError>;

    /// Get the backend name
    fn backend_name(&self) -> &str;
}
