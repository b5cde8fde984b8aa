//! Run records
//!
//! Execution never mutates a definition. Each invocation produces an [`ExecutionResult`]
//! and, when it paused for human input, a [`Suspension`] the caller owns until it resumes
//! or abandons the run.

use crate::context::{Context, ContextValue};
use crate::error::{EngineError, ResumeError};
use crate::generation::BlockedReport;
use crate::thread::ThreadPause;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Terminal status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    /// The generation step refused the goal with the current context
    Blocked,
    AwaitingInput,
    Error,
    /// Refinement loop ran out of iterations without approval
    MaxIterations,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Blocked => "blocked",
            Status::AwaitingInput => "awaiting_input",
            Status::Error => "error",
            Status::MaxIterations => "max_iterations",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refinement loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    Approved,
    Exhausted,
    Failed,
}

/// Which half of a refinement iteration a loop was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Target,
    Evaluator,
}

/// What happened to a MetaFlow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Completed,
    /// Failed and halted the meta flow
    Failed,
    /// Failed, but the node is best-effort so siblings kept running
    FailedBestEffort,
    /// Not run because a predecessor did not complete
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub outcome: NodeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ContextValue>,
}

/// Continuation state of a paused invocation, one frame per composition level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Suspension {
    Thread(ThreadPause),
    Unit {
        unit_id: Uuid,
        thread: ThreadPause,
    },
    Flow {
        flow_id: Uuid,
        unit_index: usize,
        inner: Box<Suspension>,
    },
    Loop {
        loop_id: Uuid,
        iteration: u32,
        phase: LoopPhase,
        feedback_history: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_output: Option<ContextValue>,
        inner: Box<Suspension>,
    },
    MetaFlow {
        meta_id: Uuid,
        node: String,
        initial: Context,
        completed: Vec<NodeRecord>,
        inner: Box<Suspension>,
    },
}

impl Suspension {
    /// The innermost paused thread step.
    pub fn pause(&self) -> &ThreadPause {
        match self {
            Suspension::Thread(pause) => pause,
            Suspension::Unit { thread, .. } => thread,
            Suspension::Flow { inner, .. }
            | Suspension::Loop { inner, .. }
            | Suspension::MetaFlow { inner, .. } => inner.pause(),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.pause().prompt
    }

    pub fn input_key(&self) -> &str {
        &self.pause().key
    }

    pub fn choices(&self) -> Option<&[String]> {
        self.pause().choices.as_deref()
    }

    pub fn level(&self) -> &'static str {
        match self {
            Suspension::Thread(_) => "thread",
            Suspension::Unit { .. } => "unit",
            Suspension::Flow { .. } => "flow",
            Suspension::Loop { .. } => "loop",
            Suspension::MetaFlow { .. } => "meta_flow",
        }
    }
}

/// Result of executing or resuming any composition level
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: Status,
    pub context: Context,
    pub output: Option<ContextValue>,
    pub error: Option<EngineError>,
    pub suspension: Option<Suspension>,
    pub blocked: Option<BlockedReport>,
    pub loop_state: Option<LoopState>,
    /// Refinement iterations started (0 outside loops)
    pub iterations: u32,
    pub feedback_history: Vec<String>,
    pub nodes: Vec<NodeRecord>,
}

impl ExecutionResult {
    fn with_status(status: Status, context: Context) -> Self {
        Self {
            status,
            context,
            output: None,
            error: None,
            suspension: None,
            blocked: None,
            loop_state: None,
            iterations: 0,
            feedback_history: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn success(context: Context, output: Option<ContextValue>) -> Self {
        let mut result = Self::with_status(Status::Success, context);
        result.output = output;
        result
    }

    pub fn failure(context: Context, error: EngineError) -> Self {
        let mut result = Self::with_status(Status::Error, context);
        result.error = Some(error);
        result
    }

    pub fn blocked(context: Context, report: BlockedReport) -> Self {
        let mut result = Self::with_status(Status::Blocked, context);
        result.blocked = Some(report);
        result
    }

    /// Paused result; the context is the one captured at the paused step.
    pub fn awaiting_input(suspension: Suspension) -> Self {
        let context = suspension.pause().context.clone();
        let mut result = Self::with_status(Status::AwaitingInput, context);
        result.suspension = Some(suspension);
        result
    }

    /// Cancelled invocations discard their partial context.
    pub fn cancelled() -> Self {
        let mut result = Self::with_status(Status::Cancelled, Context::new());
        result.error = Some(EngineError::Cancelled);
        result
    }

    /// Resume rejected before anything ran; the context is the one the suspension captured.
    pub fn resume_mismatch(suspension: &Suspension, error: ResumeError) -> Self {
        Self::failure(suspension.pause().context.clone(), error.into())
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.suspension.as_ref().map(Suspension::prompt)
    }

    /// Replace the suspension with `wrap(inner)`; no-op when not suspended.
    pub(crate) fn map_suspension(mut self, wrap: impl FnOnce(Suspension) -> Suspension) -> Self {
        if let Some(inner) = self.suspension.take() {
            self.suspension = Some(wrap(inner));
        }
        self
    }
}
