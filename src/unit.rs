//! Unit: one context thread paired with one generation step.
//!
//! Generation never runs on an incomplete thread. A paused or failed thread short-circuits
//! the unit with the thread's status unchanged.

use crate::context::{Context, ContextValue};
use crate::error::{DefinitionError, ResumeError};
use crate::generation::{GenerationConfig, GenerationOutcome, GenerationStep};
use crate::result::{ExecutionResult, Suspension};
use crate::runtime::Runtime;
use crate::thread::{ContextThread, ThreadRun};
use crate::workflow::{EdgeCondition, GraphExport, GraphNodeKind, Workflow, WorkflowGraph, END, START};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    id: Uuid,
    name: String,
    thread: ContextThread,
    generation: GenerationStep,
}

impl Unit {
    pub fn new(
        name: impl Into<String>,
        thread: ContextThread,
        generation: GenerationConfig,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName("unit"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            thread,
            generation: GenerationStep::new(generation)?,
        })
    }

    pub fn thread(&self) -> &ContextThread {
        &self.thread
    }

    pub fn generation(&self) -> &GenerationStep {
        &self.generation
    }

    async fn finish(&self, run: ThreadRun, runtime: &Runtime) -> ExecutionResult {
        match run {
            ThreadRun::Completed(context) => self.generate(context, runtime).await,
            ThreadRun::Paused(pause) => ExecutionResult::awaiting_input(Suspension::Unit {
                unit_id: self.id,
                thread: pause,
            }),
            ThreadRun::Failed(context, err) => ExecutionResult::failure(context, err),
            ThreadRun::Cancelled => ExecutionResult::cancelled(),
        }
    }

    async fn generate(&self, context: Context, runtime: &Runtime) -> ExecutionResult {
        if runtime.is_cancelled() {
            return ExecutionResult::cancelled();
        }
        match self.generation.run(&context, runtime).await {
            Ok(GenerationOutcome::Produced { output, context }) => {
                ExecutionResult::success(context, Some(output))
            }
            Ok(GenerationOutcome::Blocked { report }) => ExecutionResult::blocked(context, report),
            Err(err) => ExecutionResult::failure(context, err),
        }
    }

    fn report(&self, result: &ExecutionResult, runtime: &Runtime) {
        info!(
            unit = %self.name,
            status = %result.status,
            context_version = result.context.version(),
            "unit finished"
        );
        runtime.emit(
            &self.name,
            "unit_finished",
            json!({
                "unit_id": self.id,
                "status": result.status.as_str(),
                "error": result.error.as_ref().map(|err| err.to_string()),
            }),
        );
    }
}

#[async_trait]
impl Workflow for Unit {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "unit"
    }

    async fn execute(&self, context: Context, runtime: &Runtime) -> ExecutionResult {
        debug!(unit = %self.name, context_version = context.version(), "unit started");
        runtime.emit(&self.name, "unit_started", json!({ "unit_id": self.id }));
        let run = self.thread.run_from(0, context, runtime);
        let result = self.finish(run, runtime).await;
        self.report(&result, runtime);
        result
    }

    async fn resume(
        &self,
        suspension: Suspension,
        answer: ContextValue,
        runtime: &Runtime,
    ) -> ExecutionResult {
        let pause = match &suspension {
            Suspension::Unit { unit_id, thread } if *unit_id == self.id => thread,
            Suspension::Unit { unit_id, .. } => {
                let err = ResumeError::ForeignDefinition {
                    kind: "unit",
                    expected: self.id,
                    actual: *unit_id,
                };
                return ExecutionResult::resume_mismatch(&suspension, err);
            }
            _ => return ExecutionResult::resume_mismatch(&suspension, ResumeError::ShapeMismatch("unit")),
        };
        debug!(unit = %self.name, step_index = pause.step_index, "unit resuming");
        let run = self.thread.resume_run(pause, answer, runtime);
        let result = self.finish(run, runtime).await;
        self.report(&result, runtime);
        result
    }
}

impl GraphExport for Unit {
    fn to_graph(&self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(&self.name);
        let thread = graph.add_node(
            "thread",
            GraphNodeKind::Thread,
            self.thread.name(),
            Some(self.thread.to_graph()),
        );
        let generation = graph.add_node(
            "generation",
            GraphNodeKind::Generation,
            self.generation.name(),
            None,
        );
        graph.add_edge(START, &thread, EdgeCondition::Always);
        graph.add_edge(&thread, &generation, EdgeCondition::Success);
        graph.add_edge(&thread, END, EdgeCondition::AwaitingInput);
        graph.add_edge(&thread, END, EdgeCondition::Failure);
        graph.add_edge(&generation, END, EdgeCondition::Success);
        graph.add_edge(&generation, END, EdgeCondition::Failure);
        graph
    }
}
