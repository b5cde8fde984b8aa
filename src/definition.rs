//! Serializable workflow definitions.
//!
//! A [`WorkflowSpec`] is plain data (TOML or JSON) describing any of the four composition
//! levels. [`WorkflowSpec::build`] validates it and produces the runnable definition; every
//! build-time rule of the runtime constructors applies, so a spec that loads is a spec that
//! can run.

use crate::config::RuntimeConfig;
use crate::error::DefinitionError;
use crate::flow::Flow;
use crate::generation::GenerationConfig;
use crate::meta_flow::MetaFlow;
use crate::refinement::RefinementLoop;
use crate::thread::{ContextThread, ThreadStep};
use crate::unit::Unit;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSpec {
    /// Defaults to `{unit}_thread`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<ThreadStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    #[serde(default)]
    pub thread: ThreadSpec,
    pub generation: GenerationConfig,
}

impl UnitSpec {
    pub fn build(&self) -> Result<Unit, DefinitionError> {
        let thread_name = self
            .thread
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_thread", self.name));
        Unit::new(
            &self.name,
            ContextThread::new(thread_name, self.thread.steps.clone()),
            self.generation.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

impl FlowSpec {
    pub fn build(&self) -> Result<Flow, DefinitionError> {
        let units = self
            .units
            .iter()
            .map(UnitSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        Flow::new(&self.name, units)
    }
}

/// Unset fields fall back to the runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub name: String,
    pub target: UnitSpec,
    pub evaluator: UnitSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_key: Option<String>,
}

impl LoopSpec {
    pub fn build(&self, config: &RuntimeConfig) -> Result<RefinementLoop, DefinitionError> {
        let refinement = RefinementLoop::new(
            &self.name,
            self.target.build()?,
            self.evaluator.build()?,
            self.max_iterations.unwrap_or(config.default_max_iterations),
        )?;
        Ok(refinement
            .with_approval_key(self.approval_key.as_deref().unwrap_or(&config.approval_key))
            .with_feedback_key(self.feedback_key.as_deref().unwrap_or(&config.feedback_key))
            .with_iteration_key(self.iteration_key.as_deref().unwrap_or(&config.iteration_key)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaNodeSpec {
    pub name: String,
    #[serde(default)]
    pub best_effort: bool,
    pub workflow: WorkflowSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFlowSpec {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<MetaNodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl MetaFlowSpec {
    pub fn build(&self, config: &RuntimeConfig) -> Result<MetaFlow, DefinitionError> {
        let mut builder = MetaFlow::builder(&self.name);
        for node in &self.nodes {
            let workflow = node.workflow.build(config)?;
            builder = if node.best_effort {
                builder.best_effort_node(&node.name, workflow)
            } else {
                builder.node(&node.name, workflow)
            };
        }
        for edge in &self.edges {
            builder = builder.edge(&edge.from, &edge.to);
        }
        builder.build()
    }
}

/// Any composition level, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowSpec {
    Unit(UnitSpec),
    Flow(FlowSpec),
    RefinementLoop(LoopSpec),
    MetaFlow(MetaFlowSpec),
}

impl WorkflowSpec {
    pub fn name(&self) -> &str {
        match self {
            WorkflowSpec::Unit(spec) => &spec.name,
            WorkflowSpec::Flow(spec) => &spec.name,
            WorkflowSpec::RefinementLoop(spec) => &spec.name,
            WorkflowSpec::MetaFlow(spec) => &spec.name,
        }
    }

    pub fn build(&self, config: &RuntimeConfig) -> Result<Arc<dyn Workflow>, DefinitionError> {
        debug!(workflow = %self.name(), "building workflow definition");
        Ok(match self {
            WorkflowSpec::Unit(spec) => Arc::new(spec.build()?),
            WorkflowSpec::Flow(spec) => Arc::new(spec.build()?),
            WorkflowSpec::RefinementLoop(spec) => Arc::new(spec.build(config)?),
            WorkflowSpec::MetaFlow(spec) => Arc::new(spec.build(config)?),
        })
    }

    pub fn from_toml_str(source: &str) -> Result<Self, DefinitionError> {
        toml::from_str(source).map_err(|e| DefinitionError::InvalidSpec(e.to_string()))
    }

    pub fn from_json_str(source: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(source).map_err(|e| DefinitionError::InvalidSpec(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, DefinitionError> {
        toml::to_string_pretty(self).map_err(|e| DefinitionError::InvalidSpec(e.to_string()))
    }

    /// Read a spec file; `.json` files are JSON, anything else is TOML.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let source = std::fs::read_to_string(path).map_err(|e| DefinitionError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&source),
            _ => Self::from_toml_str(&source),
        }
    }
}
