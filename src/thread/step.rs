//! Thread steps
//!
//! Every step except [`HumanInput`] is a synchronous transform from one context version to
//! the next. Human input is the single suspension point.

use super::dovetail::Dovetail;
use super::weave::WeaveSpec;
use crate::context::{Context, ContextValue};
use crate::error::{ContextError, EngineError, ResourceError};
use crate::resource::{FunctionArgs, ResourceResolver};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Ask a human for a value and store the answer under `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanInput {
    pub prompt: String,
    pub key: String,
    /// Allowed answers; any answer is accepted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

impl HumanInput {
    pub fn accepts(&self, answer: &str) -> bool {
        self.choices
            .as_ref()
            .map_or(true, |choices| choices.iter().any(|choice| choice == answer))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadStep {
    InjectLiteral {
        key: String,
        value: ContextValue,
    },
    InjectFile {
        path: PathBuf,
        key: String,
    },
    /// Call a registered function. String args of the form `$name` read context key `name`.
    InjectFunction {
        function: String,
        #[serde(default)]
        args: BTreeMap<String, Value>,
        key: String,
    },
    InjectEnv {
        var: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Weave(WeaveSpec),
    Dovetail(Dovetail),
    HumanInput(HumanInput),
}

impl ThreadStep {
    pub fn literal(key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        ThreadStep::InjectLiteral {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        ThreadStep::InjectFile {
            path: path.into(),
            key: key.into(),
        }
    }

    pub fn function<I, K>(function: impl Into<String>, args: I, key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        ThreadStep::InjectFunction {
            function: function.into(),
            args: args.into_iter().map(|(name, value)| (name.into(), value)).collect(),
            key: key.into(),
        }
    }

    pub fn env(var: impl Into<String>, key: impl Into<String>) -> Self {
        ThreadStep::InjectEnv {
            var: var.into(),
            key: key.into(),
            default: None,
        }
    }

    pub fn env_or(var: impl Into<String>, key: impl Into<String>, default: impl Into<String>) -> Self {
        ThreadStep::InjectEnv {
            var: var.into(),
            key: key.into(),
            default: Some(default.into()),
        }
    }

    pub fn human(prompt: impl Into<String>, key: impl Into<String>) -> Self {
        ThreadStep::HumanInput(HumanInput {
            prompt: prompt.into(),
            key: key.into(),
            choices: None,
        })
    }

    pub fn human_choice<I, S>(prompt: impl Into<String>, key: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ThreadStep::HumanInput(HumanInput {
            prompt: prompt.into(),
            key: key.into(),
            choices: Some(choices.into_iter().map(Into::into).collect()),
        })
    }

    pub fn weave(spec: WeaveSpec) -> Self {
        ThreadStep::Weave(spec)
    }

    pub fn dovetail(dovetail: Dovetail) -> Self {
        ThreadStep::Dovetail(dovetail)
    }

    /// Short label used in logs and graph exports.
    pub fn label(&self) -> String {
        match self {
            ThreadStep::InjectLiteral { key, .. } => format!("literal -> {}", key),
            ThreadStep::InjectFile { path, key } => format!("file {} -> {}", path.display(), key),
            ThreadStep::InjectFunction { function, key, .. } => {
                format!("function {} -> {}", function, key)
            }
            ThreadStep::InjectEnv { var, key, .. } => format!("env {} -> {}", var, key),
            ThreadStep::Weave(spec) => format!("weave ({} ops)", spec.ops.len()),
            ThreadStep::Dovetail(dovetail) => format!("dovetail {}", dovetail.name),
            ThreadStep::HumanInput(input) => format!("human -> {}", input.key),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ThreadStep::InjectLiteral { .. } => "inject_literal",
            ThreadStep::InjectFile { .. } => "inject_file",
            ThreadStep::InjectFunction { .. } => "inject_function",
            ThreadStep::InjectEnv { .. } => "inject_env",
            ThreadStep::Weave(_) => "weave",
            ThreadStep::Dovetail(_) => "dovetail",
            ThreadStep::HumanInput(_) => "human_input",
        }
    }

    /// Apply a non-suspending step. `HumanInput` passes the context through unchanged; the
    /// thread handles the pause before reaching here.
    pub(crate) fn apply(
        &self,
        context: &Context,
        resources: &dyn ResourceResolver,
    ) -> Result<Context, EngineError> {
        match self {
            ThreadStep::InjectLiteral { key, value } => Ok(context.with(key.clone(), value.clone())),
            ThreadStep::InjectFile { path, key } => {
                let contents = resources.read_file(path)?;
                Ok(context.with(key.clone(), contents))
            }
            ThreadStep::InjectFunction {
                function,
                args,
                key,
            } => {
                let args = resolve_args(context, args)?;
                let value = resources.call_function(function, &args)?;
                Ok(context.with(key.clone(), value))
            }
            ThreadStep::InjectEnv { var, key, default } => {
                let value = match (resources.read_env(var), default) {
                    (Ok(value), _) => value,
                    (Err(ResourceError::MissingEnv(_)), Some(default)) => default.clone(),
                    (Err(err), _) => return Err(err.into()),
                };
                Ok(context.with(key.clone(), value))
            }
            ThreadStep::Weave(spec) => Ok(spec.apply(context)?),
            ThreadStep::Dovetail(dovetail) => Ok(dovetail.apply(context)?),
            ThreadStep::HumanInput(_) => Ok(context.clone()),
        }
    }
}

fn resolve_args(
    context: &Context,
    args: &BTreeMap<String, Value>,
) -> Result<FunctionArgs, ContextError> {
    args.iter()
        .map(|(name, value)| {
            let resolved = match value.as_str().and_then(|text| text.strip_prefix('$')) {
                Some(key) => context.require(key)?.clone(),
                None => ContextValue::from_json(value.clone()),
            };
            Ok((name.clone(), resolved))
        })
        .collect()
}
