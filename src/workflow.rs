//! Uniform entry contract and graph export
//!
//! Every composition level (unit, flow, refinement loop, meta flow) implements
//! [`Workflow`], so callers run and resume them the same way and a meta flow can nest any
//! of them. [`GraphExport`] is the explicit capability for handing a definition's shape to a
//! third-party graph engine; the exported graph describes the same sequencing and status
//! edges the engine itself follows.

use crate::context::{Context, ContextValue};
use crate::result::{ExecutionResult, Suspension};
use crate::runtime::Runtime;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry node id of every exported graph
pub const START: &str = "__start__";
/// Exit node id of every exported graph
pub const END: &str = "__end__";

#[async_trait]
pub trait Workflow: GraphExport + Send + Sync + std::fmt::Debug {
    /// Identity checked when resuming a suspension
    fn id(&self) -> Uuid;

    fn name(&self) -> &str;

    /// `unit`, `flow`, `refinement_loop` or `meta_flow`
    fn kind(&self) -> &'static str;

    async fn execute(&self, context: Context, runtime: &Runtime) -> ExecutionResult;

    /// Continue an invocation this workflow suspended, with `answer` for the pending prompt.
    async fn resume(
        &self,
        suspension: Suspension,
        answer: ContextValue,
        runtime: &Runtime,
    ) -> ExecutionResult;
}

/// Capability to describe a definition as a directed graph
pub trait GraphExport {
    fn to_graph(&self) -> WorkflowGraph;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNodeKind {
    Start,
    End,
    ThreadStep,
    HumanInput,
    Generation,
    Thread,
    Unit,
    Flow,
    RefinementLoop,
    MetaFlow,
}

/// Status an edge is taken on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    Always,
    Success,
    AwaitingInput,
    Failure,
    Approved,
    Rejected,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: GraphNodeKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph: Option<Box<WorkflowGraph>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub best_effort: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub condition: EdgeCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Graph holding only the start and end nodes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: vec![
                GraphNode {
                    id: START.to_string(),
                    kind: GraphNodeKind::Start,
                    label: "start".to_string(),
                    subgraph: None,
                    best_effort: false,
                },
                GraphNode {
                    id: END.to_string(),
                    kind: GraphNodeKind::End,
                    label: "end".to_string(),
                    subgraph: None,
                    best_effort: false,
                },
            ],
            edges: Vec::new(),
        }
    }

    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        kind: GraphNodeKind,
        label: impl Into<String>,
        subgraph: Option<WorkflowGraph>,
    ) -> String {
        let id = id.into();
        self.nodes.push(GraphNode {
            id: id.clone(),
            kind,
            label: label.into(),
            subgraph: subgraph.map(Box::new),
            best_effort: false,
        });
        id
    }

    pub fn add_edge(&mut self, from: &str, to: &str, condition: EdgeCondition) {
        self.edges.push(GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            condition,
        });
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    /// Targets reachable from `from` on `condition`.
    pub fn successors(&self, from: &str, condition: EdgeCondition) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.from == from && edge.condition == condition)
            .map(|edge| edge.to.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
