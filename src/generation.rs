//! Generation step
//!
//! Resolves a [`GenerationConfig`]'s templates against a context, hands the request to the
//! runtime's backend, and merges what comes back into the next context version. This layer
//! never retries; a backend failure is returned as-is with the config name attached.

pub mod blocked;
pub mod tags;

pub use blocked::{BlockedReport, BLOCKED_INSTRUCTIONS};
pub use tags::extract_tags;

use crate::context::template;
use crate::context::{Context, ContextValue, ValueKind};
use crate::error::{ContextError, DefinitionError, EngineError, GenerationError};
use crate::provider::{GenerationOutput, GenerationRequest};
use crate::runtime::Runtime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

fn default_output_key() -> String {
    "text".to_string()
}

/// Immutable description of one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Goal template; `{key}` placeholders resolve against the context
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Context key the output text is stored under
    #[serde(default = "default_output_key")]
    pub output_key: String,
    /// Declared kind of every placeholder the templates use
    #[serde(default)]
    pub inputs: BTreeMap<String, ValueKind>,
    /// Fallbacks for placeholders the context does not provide
    #[serde(default)]
    pub defaults: BTreeMap<String, ContextValue>,
    /// Tags lifted out of the output text into the context
    #[serde(default)]
    pub extract_tags: Vec<String>,
    /// Append `<genuinely-blocked>` reporting instructions to the goal
    #[serde(default)]
    pub report_blocked: bool,
}

impl GenerationConfig {
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            goal: goal.into(),
            output_schema: None,
            output_key: default_output_key(),
            inputs: BTreeMap::new(),
            defaults: BTreeMap::new(),
            extract_tags: Vec::new(),
            report_blocked: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Declare a placeholder and the kind of value it must hold.
    pub fn declare(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.inputs.insert(key.into(), kind);
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn extract_tag(mut self, tag: impl Into<String>) -> Self {
        self.extract_tags.push(tag.into());
        self
    }

    pub fn with_blocked_reporting(mut self) -> Self {
        self.report_blocked = true;
        self
    }

    fn templates(&self) -> impl Iterator<Item = &str> {
        self.system_prompt
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.goal.as_str()))
    }

    /// Build-time checks: every placeholder is declared and every default has its declared kind.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName("generation config"));
        }
        for source in self.templates() {
            let names =
                template::placeholders(source).map_err(|message| DefinitionError::MalformedTemplate {
                    config: self.name.clone(),
                    message,
                })?;
            if let Some(key) = names.into_iter().find(|name| !self.inputs.contains_key(name)) {
                return Err(DefinitionError::UndeclaredPlaceholder {
                    config: self.name.clone(),
                    key,
                });
            }
        }
        for (key, value) in &self.defaults {
            let expected = self.inputs.get(key).copied().unwrap_or(ValueKind::Any);
            if !expected.accepts(value) {
                return Err(DefinitionError::DefaultKindMismatch {
                    config: self.name.clone(),
                    key: key.clone(),
                    expected,
                    found: value.kind(),
                });
            }
        }
        Ok(())
    }

    fn resolve_placeholder(&self, context: &Context, name: &str) -> Result<String, ContextError> {
        let value = context
            .resolve_path(name)
            .or_else(|| self.defaults.get(name).cloned())
            .ok_or_else(|| ContextError::MissingKey(name.to_string()))?;
        let expected = self.inputs.get(name).copied().unwrap_or(ValueKind::Any);
        if !expected.accepts(&value) {
            return Err(ContextError::TypeMismatch {
                key: name.to_string(),
                expected,
                found: value.kind(),
            });
        }
        Ok(value.render())
    }

    /// Resolve both templates against `context` into a backend request.
    pub fn resolve(&self, context: &Context) -> Result<GenerationRequest, ContextError> {
        let lookup = |name: &str| self.resolve_placeholder(context, name);
        let system_prompt = self
            .system_prompt
            .as_deref()
            .map(|source| template::render(source, lookup))
            .transpose()?;
        let mut goal = template::render(&self.goal, lookup)?;
        if self.report_blocked {
            goal.push_str(BLOCKED_INSTRUCTIONS);
        }
        Ok(GenerationRequest {
            config_name: self.name.clone(),
            system_prompt,
            goal,
            output_schema: self.output_schema.clone(),
        })
    }
}

/// What a generation step produced
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Produced { output: ContextValue, context: Context },
    /// The backend refused the goal with a `<genuinely-blocked>` report
    Blocked { report: BlockedReport },
}

/// A validated generation config, ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStep {
    config: Arc<GenerationConfig>,
}

impl GenerationStep {
    pub fn new(config: GenerationConfig) -> Result<Self, DefinitionError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub async fn run(
        &self,
        context: &Context,
        runtime: &Runtime,
    ) -> Result<GenerationOutcome, EngineError> {
        let config = &self.config;
        let request = config.resolve(context)?;
        debug!(
            config = %config.name,
            backend = %runtime.backend_name(),
            goal_len = request.goal.len(),
            "invoking generation backend"
        );

        let produced = runtime
            .invoke(request)
            .await
            .map_err(|cause| self.failure(cause))?;

        if let Some(report) = BlockedReport::parse(&config.name, &produced.text) {
            debug!(config = %config.name, reason = %report.reason, "generation reported blocked");
            return Ok(GenerationOutcome::Blocked { report });
        }

        let (output, context) = self.merge(context, produced)?;
        Ok(GenerationOutcome::Produced { output, context })
    }

    /// Lay the output into the context as a single new version: text under the output key,
    /// then structured fields, then extracted tags.
    fn merge(
        &self,
        context: &Context,
        produced: GenerationOutput,
    ) -> Result<(ContextValue, Context), EngineError> {
        let config = &self.config;
        let tags = extract_tags(&produced.text, &config.extract_tags);
        let output = match &produced.structured {
            Some(structured) => ContextValue::Record(structured.clone()),
            None => ContextValue::Text(produced.text.clone()),
        };

        let next = context.try_derive(|entries| {
            entries.insert(
                config.output_key.clone(),
                ContextValue::Text(produced.text.clone()),
            );
            match produced.structured {
                Some(Value::Object(fields)) => {
                    for (key, value) in fields {
                        entries.insert(key, ContextValue::from_json(value));
                    }
                }
                Some(other) => {
                    return Err(GenerationError::Malformed(format!(
                        "structured output must be a JSON object, got {}",
                        json_type(&other)
                    )))
                }
                None => {}
            }
            for (tag, body) in tags {
                entries.insert(tag, ContextValue::Text(body));
            }
            Ok(())
        });

        let next = next.map_err(|cause| self.failure(cause))?;
        Ok((output, next))
    }

    fn failure(&self, cause: GenerationError) -> EngineError {
        EngineError::Generation {
            config: self.config.name.clone(),
            cause,
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
