//! Context threads
//!
//! A [`ContextThread`] runs its steps strictly in declared order to prepare a context for
//! generation. Hitting a human input step halts the thread and hands the caller a
//! [`ThreadPause`]; resuming re-enters exactly at that step, after checking the pause really
//! belongs to this thread and the context it captured has not drifted.

pub mod dovetail;
pub mod step;
pub mod weave;

pub use dovetail::{Dovetail, DovetailInput};
pub use step::{HumanInput, ThreadStep};
pub use weave::{WeaveOp, WeaveSpec};

use crate::context::{Context, ContextValue};
use crate::error::{EngineError, ResumeError};
use crate::result::{ExecutionResult, Suspension};
use crate::runtime::Runtime;
use crate::workflow::{EdgeCondition, GraphExport, GraphNodeKind, WorkflowGraph, END, START};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything needed to re-enter a thread at its paused human input step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPause {
    pub thread_id: Uuid,
    pub step_index: usize,
    pub context_version: u64,
    pub context_digest: String,
    /// Context as of the paused step
    pub context: Context,
    pub prompt: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

/// Internal outcome of running a thread, before it is folded into an [`ExecutionResult`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ThreadRun {
    Completed(Context),
    Paused(ThreadPause),
    Failed(Context, EngineError),
    Cancelled,
}

impl ThreadRun {
    pub(crate) fn into_result(self) -> ExecutionResult {
        match self {
            ThreadRun::Completed(context) => ExecutionResult::success(context, None),
            ThreadRun::Paused(pause) => ExecutionResult::awaiting_input(Suspension::Thread(pause)),
            ThreadRun::Failed(context, err) => ExecutionResult::failure(context, err),
            ThreadRun::Cancelled => ExecutionResult::cancelled(),
        }
    }
}

/// Ordered, immutable sequence of context preparation steps
#[derive(Debug, Clone, PartialEq)]
pub struct ContextThread {
    id: Uuid,
    name: String,
    steps: Arc<[ThreadStep]>,
}

impl ContextThread {
    pub fn new(name: impl Into<String>, steps: Vec<ThreadStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps: steps.into(),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[ThreadStep] {
        &self.steps
    }

    pub fn run(&self, context: Context, runtime: &Runtime) -> ExecutionResult {
        self.run_from(0, context, runtime).into_result()
    }

    /// Continue a paused run with `answer` stored under the paused step's key.
    pub fn resume(
        &self,
        pause: &ThreadPause,
        answer: impl Into<ContextValue>,
        runtime: &Runtime,
    ) -> ExecutionResult {
        self.resume_run(pause, answer.into(), runtime).into_result()
    }

    pub(crate) fn run_from(&self, start: usize, context: Context, runtime: &Runtime) -> ThreadRun {
        let mut context = context;
        for (index, step) in self.steps.iter().enumerate().skip(start) {
            if runtime.is_cancelled() {
                info!(thread = %self.name, step_index = index, "thread cancelled");
                return ThreadRun::Cancelled;
            }

            if let ThreadStep::HumanInput(input) = step {
                debug!(thread = %self.name, step_index = index, key = %input.key, "pausing for human input");
                runtime.emit(
                    &self.name,
                    "human_input_requested",
                    json!({ "step_index": index, "key": input.key, "prompt": input.prompt }),
                );
                return ThreadRun::Paused(ThreadPause {
                    thread_id: self.id,
                    step_index: index,
                    context_version: context.version(),
                    context_digest: context.digest(),
                    context,
                    prompt: input.prompt.clone(),
                    key: input.key.clone(),
                    choices: input.choices.clone(),
                });
            }

            debug!(thread = %self.name, step_index = index, step = %step.label(), "applying thread step");
            match step.apply(&context, runtime.resources()) {
                Ok(next) => context = next,
                Err(err) => {
                    debug!(thread = %self.name, step_index = index, error = %err, "thread step failed");
                    return ThreadRun::Failed(context, err);
                }
            }
        }
        ThreadRun::Completed(context)
    }

    pub(crate) fn resume_run(
        &self,
        pause: &ThreadPause,
        answer: ContextValue,
        runtime: &Runtime,
    ) -> ThreadRun {
        match self.check_pause(pause, &answer) {
            Ok(key) => {
                debug!(thread = %self.name, step_index = pause.step_index, key = %key, "resuming thread");
                let context = pause.context.with(key, answer);
                self.run_from(pause.step_index + 1, context, runtime)
            }
            Err(err) => ThreadRun::Failed(pause.context.clone(), err.into()),
        }
    }

    /// Verify `pause` was produced by this thread at a human input step and that its context
    /// is intact. Returns the key the answer goes under.
    fn check_pause(&self, pause: &ThreadPause, answer: &ContextValue) -> Result<String, ResumeError> {
        if pause.thread_id != self.id {
            return Err(ResumeError::ForeignDefinition {
                kind: "thread",
                expected: self.id,
                actual: pause.thread_id,
            });
        }
        let input = match self.steps.get(pause.step_index) {
            Some(ThreadStep::HumanInput(input)) if input.key == pause.key => input,
            _ => {
                return Err(ResumeError::StaleStep {
                    step_index: pause.step_index,
                })
            }
        };
        if pause.context.version() != pause.context_version {
            return Err(ResumeError::ContextVersion {
                expected: pause.context_version,
                actual: pause.context.version(),
            });
        }
        if pause.context.digest() != pause.context_digest {
            return Err(ResumeError::ContextDigest);
        }
        let rendered = answer.render();
        if !input.accepts(&rendered) {
            return Err(ResumeError::AnswerNotAllowed {
                answer: rendered,
                choices: input.choices.clone().unwrap_or_default(),
            });
        }
        Ok(input.key.clone())
    }
}

impl GraphExport for ContextThread {
    /// Steps chained on success; every human input step can also leave the graph paused.
    fn to_graph(&self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(&self.name);
        let mut previous = (START.to_string(), EdgeCondition::Always);
        for (index, step) in self.steps.iter().enumerate() {
            let kind = match step {
                ThreadStep::HumanInput(_) => GraphNodeKind::HumanInput,
                _ => GraphNodeKind::ThreadStep,
            };
            let id = graph.add_node(format!("step_{}", index), kind, step.label(), None);
            graph.add_edge(&previous.0, &id, previous.1);
            if kind == GraphNodeKind::HumanInput {
                graph.add_edge(&id, END, EdgeCondition::AwaitingInput);
            }
            previous = (id, EdgeCondition::Success);
        }
        graph.add_edge(&previous.0, END, previous.1);
        graph
    }
}
