//! Dovetail: hand one stage's outputs to the next stage's inputs.
//!
//! Checks that the keys a previous stage promised are present, then maps dot paths from
//! those outputs onto the input names the following stage expects.

use crate::context::{Context, ContextValue};
use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_required() -> bool {
    true
}

/// Where one mapped input comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DovetailInput {
    /// Dot path into the context, e.g. `review.items.0.title`
    pub source_key: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ContextValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dovetail {
    pub name: String,
    /// Dot paths that must resolve before any mapping happens
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Target key -> source
    #[serde(default)]
    pub inputs: BTreeMap<String, DovetailInput>,
}

impl Dovetail {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected_outputs: Vec::new(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn expect(mut self, path: impl Into<String>) -> Self {
        self.expected_outputs.push(path.into());
        self
    }

    pub fn map(mut self, target: impl Into<String>, source_key: impl Into<String>) -> Self {
        self.inputs.insert(
            target.into(),
            DovetailInput {
                source_key: source_key.into(),
                required: true,
                default: None,
            },
        );
        self
    }

    /// Optional mapping; `default` is used when the source does not resolve.
    pub fn map_or(
        mut self,
        target: impl Into<String>,
        source_key: impl Into<String>,
        default: Option<ContextValue>,
    ) -> Self {
        self.inputs.insert(
            target.into(),
            DovetailInput {
                source_key: source_key.into(),
                required: false,
                default,
            },
        );
        self
    }

    pub fn apply(&self, context: &Context) -> Result<Context, ContextError> {
        let missing: Vec<String> = self
            .expected_outputs
            .iter()
            .filter(|path| context.resolve_path(path).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ContextError::MissingDovetailOutput {
                name: self.name.clone(),
                missing,
            });
        }

        let mut mapped = Vec::with_capacity(self.inputs.len());
        for (target, input) in &self.inputs {
            match context
                .resolve_path(&input.source_key)
                .or_else(|| input.default.clone())
            {
                Some(value) => mapped.push((target.clone(), value)),
                None if input.required => {
                    return Err(ContextError::MissingDovetailOutput {
                        name: self.name.clone(),
                        missing: vec![input.source_key.clone()],
                    })
                }
                None => {}
            }
        }

        Ok(context.derive(|entries| entries.extend(mapped)))
    }
}
