//! Flow: units run strictly in order, each one's context feeding the next.
//!
//! The first unit that does not succeed stops the flow. Nothing after it runs, and the
//! flow reports that unit's status with the context as of the stopping point.

use crate::context::{Context, ContextValue};
use crate::error::{DefinitionError, ResumeError};
use crate::result::{ExecutionResult, Suspension};
use crate::runtime::Runtime;
use crate::unit::Unit;
use crate::workflow::{EdgeCondition, GraphExport, GraphNodeKind, Workflow, WorkflowGraph, END, START};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    id: Uuid,
    name: String,
    units: Arc<[Unit]>,
}

impl Flow {
    pub fn new(name: impl Into<String>, units: Vec<Unit>) -> Result<Self, DefinitionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName("flow"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            units: units.into(),
        })
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    async fn run_from(
        &self,
        start: usize,
        context: Context,
        output: Option<ContextValue>,
        runtime: &Runtime,
    ) -> ExecutionResult {
        let mut context = context;
        let mut output = output;
        for (index, unit) in self.units.iter().enumerate().skip(start) {
            if runtime.is_cancelled() {
                info!(flow = %self.name, unit_index = index, "flow cancelled");
                return ExecutionResult::cancelled();
            }
            debug!(flow = %self.name, unit_index = index, unit = %unit.name(), "running unit");
            let result = unit.execute(context, runtime).await;
            if !result.is_success() {
                return self.halt(index, result, runtime);
            }
            context = result.context;
            output = result.output;
        }
        self.report(ExecutionResult::success(context, output), self.units.len(), runtime)
    }

    /// Stop at `index`, wrapping any suspension so a later resume re-enters this unit.
    fn halt(&self, index: usize, result: ExecutionResult, runtime: &Runtime) -> ExecutionResult {
        let flow_id = self.id;
        let result = result.map_suspension(|inner| Suspension::Flow {
            flow_id,
            unit_index: index,
            inner: Box::new(inner),
        });
        self.report(result, index, runtime)
    }

    fn report(&self, result: ExecutionResult, stopped_at: usize, runtime: &Runtime) -> ExecutionResult {
        info!(
            flow = %self.name,
            status = %result.status,
            stopped_at,
            units = self.units.len(),
            "flow finished"
        );
        runtime.emit(
            &self.name,
            "flow_finished",
            json!({
                "flow_id": self.id,
                "status": result.status.as_str(),
                "stopped_at": stopped_at,
                "total_units": self.units.len(),
            }),
        );
        result
    }
}

#[async_trait]
impl Workflow for Flow {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "flow"
    }

    async fn execute(&self, context: Context, runtime: &Runtime) -> ExecutionResult {
        runtime.emit(
            &self.name,
            "flow_started",
            json!({ "flow_id": self.id, "total_units": self.units.len() }),
        );
        self.run_from(0, context, None, runtime).await
    }

    async fn resume(
        &self,
        suspension: Suspension,
        answer: ContextValue,
        runtime: &Runtime,
    ) -> ExecutionResult {
        let (unit_index, inner) = match suspension {
            Suspension::Flow {
                flow_id,
                unit_index,
                inner,
            } if flow_id == self.id => (unit_index, *inner),
            Suspension::Flow { flow_id, .. } => {
                let err = ResumeError::ForeignDefinition {
                    kind: "flow",
                    expected: self.id,
                    actual: flow_id,
                };
                return ExecutionResult::resume_mismatch(&suspension, err);
            }
            other => return ExecutionResult::resume_mismatch(&other, ResumeError::ShapeMismatch("flow")),
        };
        let Some(unit) = self.units.get(unit_index) else {
            let err = ResumeError::StaleStep {
                step_index: unit_index,
            };
            return ExecutionResult::resume_mismatch(&inner, err);
        };

        debug!(flow = %self.name, unit_index, "flow resuming");
        let result = unit.resume(inner, answer, runtime).await;
        if !result.is_success() {
            return self.halt(unit_index, result, runtime);
        }
        self.run_from(unit_index + 1, result.context, result.output, runtime)
            .await
    }
}

impl GraphExport for Flow {
    fn to_graph(&self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(&self.name);
        let mut previous = (START.to_string(), EdgeCondition::Always);
        for (index, unit) in self.units.iter().enumerate() {
            let id = graph.add_node(
                format!("unit_{}", index),
                GraphNodeKind::Unit,
                unit.name(),
                Some(unit.to_graph()),
            );
            graph.add_edge(&previous.0, &id, previous.1);
            graph.add_edge(&id, END, EdgeCondition::Failure);
            graph.add_edge(&id, END, EdgeCondition::AwaitingInput);
            previous = (id, EdgeCondition::Success);
        }
        graph.add_edge(&previous.0, END, previous.1);
        graph
    }
}
