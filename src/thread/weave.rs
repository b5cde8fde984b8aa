//! Context surgery: drop, rename, copy and merge keys.

use crate::context::{Context, ContextValue};
use crate::error::ContextError;
use serde::{Deserialize, Serialize};

fn default_separator() -> String {
    "\n\n".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WeaveOp {
    /// Remove a key; absent keys are ignored
    Drop { key: String },
    Rename { from: String, to: String },
    Copy { from: String, to: String },
    /// Join the rendered sources into one text value
    Merge {
        sources: Vec<String>,
        into: String,
        #[serde(default = "default_separator")]
        separator: String,
    },
}

/// Ordered list of rewrites applied as one context version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaveSpec {
    pub ops: Vec<WeaveOp>,
}

impl WeaveSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drop(mut self, key: impl Into<String>) -> Self {
        self.ops.push(WeaveOp::Drop { key: key.into() });
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(WeaveOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn copy(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(WeaveOp::Copy {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn merge<I, S>(mut self, sources: I, into: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ops.push(WeaveOp::Merge {
            sources: sources.into_iter().map(Into::into).collect(),
            into: into.into(),
            separator: default_separator(),
        });
        self
    }

    /// Apply every op in order. Ops see the effect of earlier ops; any failure leaves
    /// `context` untouched.
    pub fn apply(&self, context: &Context) -> Result<Context, ContextError> {
        context.try_derive(|entries| {
            for op in &self.ops {
                match op {
                    WeaveOp::Drop { key } => {
                        entries.remove(key);
                    }
                    WeaveOp::Rename { from, to } => {
                        let value = entries
                            .remove(from)
                            .ok_or_else(|| ContextError::MissingKey(from.clone()))?;
                        entries.insert(to.clone(), value);
                    }
                    WeaveOp::Copy { from, to } => {
                        let value = entries
                            .get(from)
                            .cloned()
                            .ok_or_else(|| ContextError::MissingKey(from.clone()))?;
                        entries.insert(to.clone(), value);
                    }
                    WeaveOp::Merge {
                        sources,
                        into,
                        separator,
                    } => {
                        let parts = sources
                            .iter()
                            .map(|source| {
                                entries
                                    .get(source)
                                    .map(ContextValue::render)
                                    .ok_or_else(|| ContextError::MissingKey(source.clone()))
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        entries.insert(into.clone(), ContextValue::Text(parts.join(separator)));
                    }
                }
            }
            Ok(())
        })
    }
}
