//! Weft: Composable Context-Preparation and Generation Workflows
//!
//! A unit prepares a context through an ordered thread of steps, then hands it to one
//! generation call. Units compose into flows, refinement loops and dependency graphs
//! (meta flows), and any level can pause for human input and resume later from a
//! serializable suspension.

pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod flow;
pub mod generation;
pub mod logging;
pub mod meta_flow;
pub mod provider;
pub mod refinement;
pub mod resource;
pub mod result;
pub mod runtime;
pub mod thread;
pub mod unit;
pub mod workflow;

pub use config::{ConfigLoader, EngineConfig, RuntimeConfig};
pub use context::{Context, ContextValue, ValueKind};
pub use definition::WorkflowSpec;
pub use error::{
    ContextError, DefinitionError, EngineError, GenerationError, ResourceError, ResumeError,
    SetupError,
};
pub use flow::Flow;
pub use generation::{BlockedReport, GenerationConfig, GenerationStep};
pub use meta_flow::{MetaFlow, MetaFlowBuilder};
pub use provider::{EchoBackend, GenerationBackend, ScriptedBackend};
pub use refinement::RefinementLoop;
pub use resource::{FunctionRegistry, LocalResolver, ResourceResolver};
pub use result::{ExecutionResult, LoopState, Status, Suspension};
pub use runtime::{CancelHandle, ExecutionObserver, Runtime};
pub use thread::{ContextThread, ThreadStep};
pub use unit::Unit;
pub use workflow::{GraphExport, Workflow, WorkflowGraph};
