//! Refinement loop
//!
//! A target unit produces an attempt and an evaluator unit judges it, until the evaluator
//! approves or the iteration budget runs out. Target or evaluator failure is fatal
//! (`Failed`); running out of budget is not an error but a distinct terminal status
//! (`MaxIterations`), so callers can tell "needs a different generator" from "needs more
//! attempts".
//!
//! The evaluator must set the approval key. A rejected attempt hands the evaluator's
//! feedback to the next iteration under the feedback key, replacing the previous feedback;
//! the full history is kept on the result instead.

use crate::context::{Context, ContextValue, ValueKind};
use crate::error::{ContextError, DefinitionError, ResumeError};
use crate::result::{ExecutionResult, LoopPhase, LoopState, Status, Suspension};
use crate::runtime::Runtime;
use crate::unit::Unit;
use crate::workflow::{EdgeCondition, GraphExport, GraphNodeKind, Workflow, WorkflowGraph, END, START};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_APPROVAL_KEY: &str = "approved";
pub const DEFAULT_FEEDBACK_KEY: &str = "feedback";
pub const DEFAULT_ITERATION_KEY: &str = "refinement_iteration";

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementLoop {
    id: Uuid,
    name: String,
    target: Unit,
    evaluator: Unit,
    max_iterations: u32,
    approval_key: String,
    feedback_key: String,
    iteration_key: String,
}

/// Per-invocation loop bookkeeping
#[derive(Debug, Clone)]
struct Progress {
    iteration: u32,
    history: Vec<String>,
    last_output: Option<ContextValue>,
}

/// Where the state machine picks up next
enum Next {
    Target(Context),
    TargetDone(ExecutionResult),
    EvaluatorDone(ExecutionResult),
}

impl RefinementLoop {
    pub fn new(
        name: impl Into<String>,
        target: Unit,
        evaluator: Unit,
        max_iterations: u32,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName("refinement loop"));
        }
        if max_iterations == 0 {
            return Err(DefinitionError::ZeroIterations(name));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            target,
            evaluator,
            max_iterations,
            approval_key: DEFAULT_APPROVAL_KEY.to_string(),
            feedback_key: DEFAULT_FEEDBACK_KEY.to_string(),
            iteration_key: DEFAULT_ITERATION_KEY.to_string(),
        })
    }

    pub fn with_approval_key(mut self, key: impl Into<String>) -> Self {
        self.approval_key = key.into();
        self
    }

    pub fn with_feedback_key(mut self, key: impl Into<String>) -> Self {
        self.feedback_key = key.into();
        self
    }

    pub fn with_iteration_key(mut self, key: impl Into<String>) -> Self {
        self.iteration_key = key.into();
        self
    }

    pub fn target(&self) -> &Unit {
        &self.target
    }

    pub fn evaluator(&self) -> &Unit {
        &self.evaluator
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn approval_key(&self) -> &str {
        &self.approval_key
    }

    pub fn feedback_key(&self) -> &str {
        &self.feedback_key
    }

    pub fn iteration_key(&self) -> &str {
        &self.iteration_key
    }

    async fn drive(&self, mut progress: Progress, mut next: Next, runtime: &Runtime) -> ExecutionResult {
        loop {
            next = match next {
                Next::Target(context) => {
                    if progress.iteration > self.max_iterations {
                        return self.exhausted(context, progress, runtime);
                    }
                    if runtime.is_cancelled() {
                        return self.finish(ExecutionResult::cancelled(), LoopState::Failed, progress, runtime);
                    }
                    debug!(refinement = %self.name, iteration = progress.iteration, "running target");
                    runtime.emit(
                        &self.name,
                        "iteration_started",
                        json!({ "iteration": progress.iteration, "max_iterations": self.max_iterations }),
                    );
                    let input = context.with(
                        self.iteration_key.clone(),
                        ContextValue::Record(json!(progress.iteration)),
                    );
                    Next::TargetDone(self.target.execute(input, runtime).await)
                }
                Next::TargetDone(result) => match result.status {
                    Status::Success => {
                        progress.last_output = result.output.clone();
                        if runtime.is_cancelled() {
                            return self.finish(ExecutionResult::cancelled(), LoopState::Failed, progress, runtime);
                        }
                        // The evaluator judges afresh: no verdict or feedback from earlier rounds.
                        let input = if result.context.contains(&self.approval_key)
                            || result.context.contains(&self.feedback_key)
                        {
                            let approval_key = &self.approval_key;
                            let feedback_key = &self.feedback_key;
                            result.context.derive(|entries| {
                                entries.remove(approval_key);
                                entries.remove(feedback_key);
                            })
                        } else {
                            result.context
                        };
                        debug!(refinement = %self.name, iteration = progress.iteration, "running evaluator");
                        Next::EvaluatorDone(self.evaluator.execute(input, runtime).await)
                    }
                    Status::AwaitingInput => return self.suspend(result, LoopPhase::Target, progress),
                    _ => return self.finish(result, LoopState::Failed, progress, runtime),
                },
                Next::EvaluatorDone(result) => {
                    match result.status {
                        Status::Success => {}
                        Status::AwaitingInput => {
                            return self.suspend(result, LoopPhase::Evaluator, progress)
                        }
                        _ => return self.finish(result, LoopState::Failed, progress, runtime),
                    }
                    let approved = match self.approval(&result.context) {
                        Ok(approved) => approved,
                        Err(err) => {
                            let failed = ExecutionResult::failure(result.context, err.into());
                            return self.finish(failed, LoopState::Failed, progress, runtime);
                        }
                    };
                    runtime.emit(
                        &self.name,
                        "iteration_evaluated",
                        json!({ "iteration": progress.iteration, "approved": approved }),
                    );
                    if approved {
                        let output = progress.last_output.clone();
                        let done = ExecutionResult::success(result.context, output);
                        return self.finish(done, LoopState::Approved, progress, runtime);
                    }

                    let feedback = self.feedback(&result.context, progress.iteration);
                    progress.history.push(feedback.clone());
                    progress.iteration += 1;
                    let approval_key = &self.approval_key;
                    let feedback_key = &self.feedback_key;
                    Next::Target(result.context.derive(|entries| {
                        entries.remove(approval_key);
                        entries.insert(feedback_key.clone(), ContextValue::Text(feedback));
                    }))
                }
            };
        }
    }

    /// Read the evaluator's verdict. Booleans, JSON booleans and the usual yes/no words count.
    fn approval(&self, context: &Context) -> Result<bool, ContextError> {
        let value = context
            .get(&self.approval_key)
            .ok_or_else(|| ContextError::MissingApproval {
                unit: self.evaluator.name().to_string(),
                key: self.approval_key.clone(),
            })?;
        if let Some(flag) = value.as_bool() {
            return Ok(flag);
        }
        let verdict = value
            .as_text()
            .map(|text| text.trim().to_ascii_lowercase());
        match verdict.as_deref() {
            Some("true" | "yes" | "approved") => Ok(true),
            Some("false" | "no" | "rejected") => Ok(false),
            _ => Err(ContextError::TypeMismatch {
                key: self.approval_key.clone(),
                expected: ValueKind::Bool,
                found: value.kind(),
            }),
        }
    }

    fn feedback(&self, context: &Context, iteration: u32) -> String {
        match context.get(&self.feedback_key) {
            Some(value) => value.render(),
            None => {
                warn!(
                    refinement = %self.name,
                    iteration,
                    key = %self.feedback_key,
                    "evaluator rejected without feedback"
                );
                String::new()
            }
        }
    }

    fn exhausted(&self, context: Context, progress: Progress, runtime: &Runtime) -> ExecutionResult {
        let mut result = ExecutionResult::success(context, progress.last_output.clone());
        result.status = Status::MaxIterations;
        self.finish(result, LoopState::Exhausted, progress, runtime)
    }

    fn suspend(&self, result: ExecutionResult, phase: LoopPhase, progress: Progress) -> ExecutionResult {
        debug!(refinement = %self.name, iteration = progress.iteration, ?phase, "refinement paused");
        let loop_id = self.id;
        let iteration = progress.iteration;
        let history = progress.history.clone();
        let last_output = progress.last_output.clone();
        let mut result = result.map_suspension(|inner| Suspension::Loop {
            loop_id,
            iteration,
            phase,
            feedback_history: history,
            last_output,
            inner: Box::new(inner),
        });
        result.loop_state = Some(LoopState::Running);
        result.iterations = progress.iteration;
        result.feedback_history = progress.history;
        result
    }

    fn finish(
        &self,
        mut result: ExecutionResult,
        state: LoopState,
        progress: Progress,
        runtime: &Runtime,
    ) -> ExecutionResult {
        let iterations = progress.iteration.min(self.max_iterations);
        info!(
            refinement = %self.name,
            status = %result.status,
            state = ?state,
            iterations,
            "refinement finished"
        );
        runtime.emit(
            &self.name,
            "refinement_finished",
            json!({
                "loop_id": self.id,
                "status": result.status.as_str(),
                "iterations": iterations,
                "feedback_count": progress.history.len(),
            }),
        );
        result.loop_state = Some(state);
        result.iterations = iterations;
        result.feedback_history = progress.history;
        if result.output.is_none() {
            result.output = progress.last_output;
        }
        result
    }
}

#[async_trait]
impl Workflow for RefinementLoop {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "refinement_loop"
    }

    async fn execute(&self, context: Context, runtime: &Runtime) -> ExecutionResult {
        runtime.emit(
            &self.name,
            "refinement_started",
            json!({ "loop_id": self.id, "max_iterations": self.max_iterations }),
        );
        let progress = Progress {
            iteration: 1,
            history: Vec::new(),
            last_output: None,
        };
        self.drive(progress, Next::Target(context), runtime).await
    }

    async fn resume(
        &self,
        suspension: Suspension,
        answer: ContextValue,
        runtime: &Runtime,
    ) -> ExecutionResult {
        let (progress, phase, inner) = match suspension {
            Suspension::Loop {
                loop_id,
                iteration,
                phase,
                feedback_history,
                last_output,
                inner,
            } if loop_id == self.id && (1..=self.max_iterations).contains(&iteration) => (
                Progress {
                    iteration,
                    history: feedback_history,
                    last_output,
                },
                phase,
                *inner,
            ),
            Suspension::Loop { loop_id, .. } if loop_id != self.id => {
                let err = ResumeError::ForeignDefinition {
                    kind: "refinement loop",
                    expected: self.id,
                    actual: loop_id,
                };
                return ExecutionResult::resume_mismatch(&suspension, err);
            }
            other => {
                let err = ResumeError::ShapeMismatch("refinement loop");
                return ExecutionResult::resume_mismatch(&other, err);
            }
        };

        debug!(refinement = %self.name, iteration = progress.iteration, ?phase, "refinement resuming");
        let next = match phase {
            LoopPhase::Target => Next::TargetDone(self.target.resume(inner, answer, runtime).await),
            LoopPhase::Evaluator => {
                Next::EvaluatorDone(self.evaluator.resume(inner, answer, runtime).await)
            }
        };
        self.drive(progress, next, runtime).await
    }
}

impl GraphExport for RefinementLoop {
    fn to_graph(&self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(&self.name);
        let target = graph.add_node(
            "target",
            GraphNodeKind::Unit,
            self.target.name(),
            Some(self.target.to_graph()),
        );
        let evaluator = graph.add_node(
            "evaluator",
            GraphNodeKind::Unit,
            self.evaluator.name(),
            Some(self.evaluator.to_graph()),
        );
        graph.add_edge(START, &target, EdgeCondition::Always);
        graph.add_edge(&target, &evaluator, EdgeCondition::Success);
        graph.add_edge(&target, END, EdgeCondition::Failure);
        graph.add_edge(&target, END, EdgeCondition::AwaitingInput);
        graph.add_edge(&evaluator, END, EdgeCondition::Approved);
        graph.add_edge(&evaluator, &target, EdgeCondition::Rejected);
        graph.add_edge(&evaluator, END, EdgeCondition::Exhausted);
        graph.add_edge(&evaluator, END, EdgeCondition::Failure);
        graph.add_edge(&evaluator, END, EdgeCondition::AwaitingInput);
        graph
    }
}
