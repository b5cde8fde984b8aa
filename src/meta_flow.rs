//! Meta flow: named workflows wired into a DAG.
//!
//! Nodes run one at a time in topological order (ties broken by declaration order). A root
//! node receives the meta flow's initial context; any other node receives the merged contexts
//! of its predecessors. A node failure halts the meta flow unless the node is best-effort, in
//! which case the failure is recorded and everything downstream of it is skipped.

use crate::context::{Context, ContextValue};
use crate::error::{DefinitionError, ResumeError};
use crate::result::{ExecutionResult, NodeOutcome, NodeRecord, Status, Suspension};
use crate::runtime::Runtime;
use crate::workflow::{EdgeCondition, GraphExport, GraphNodeKind, Workflow, WorkflowGraph, END, START};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MetaNode {
    name: String,
    workflow: Arc<dyn Workflow>,
    best_effort: bool,
}

/// Immutable DAG of workflows, stored in execution order
#[derive(Debug, Clone)]
pub struct MetaFlow {
    id: Uuid,
    name: String,
    nodes: Arc<[MetaNode]>,
    /// Predecessor indices per node, ascending
    predecessors: Arc<[Vec<usize>]>,
    successors: Arc<[Vec<usize>]>,
}

#[derive(Debug)]
pub struct MetaFlowBuilder {
    name: String,
    nodes: Vec<MetaNode>,
    edges: Vec<(String, String)>,
}

impl MetaFlowBuilder {
    pub fn node(mut self, name: impl Into<String>, workflow: Arc<dyn Workflow>) -> Self {
        self.nodes.push(MetaNode {
            name: name.into(),
            workflow,
            best_effort: false,
        });
        self
    }

    /// A node whose failure is recorded without halting the rest of the meta flow.
    pub fn best_effort_node(mut self, name: impl Into<String>, workflow: Arc<dyn Workflow>) -> Self {
        self.nodes.push(MetaNode {
            name: name.into(),
            workflow,
            best_effort: true,
        });
        self
    }

    /// Hand `from`'s resulting context to `to`.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    pub fn build(self) -> Result<MetaFlow, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName("meta flow"));
        }
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.name.trim().is_empty() {
                return Err(DefinitionError::EmptyName("meta flow node"));
            }
            if index_of.insert(node.name.as_str(), index).is_some() {
                return Err(DefinitionError::DuplicateNode(node.name.clone()));
            }
        }

        let count = self.nodes.len();
        let mut outgoing: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let mut in_degree = vec![0usize; count];
        for (from, to) in &self.edges {
            let lookup = |name: &String| {
                index_of
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| DefinitionError::UnknownNode(name.clone()))
            };
            let (from, to) = (lookup(from)?, lookup(to)?);
            if from == to {
                return Err(DefinitionError::Cycle(self.nodes[from].name.clone()));
            }
            if outgoing[from].insert(to) {
                in_degree[to] += 1;
            }
        }

        // Kahn's algorithm; the ready set is ordered by declaration index.
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &succ in &outgoing[next] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }
        if order.len() < count {
            let stuck = (0..count)
                .find(|i| in_degree[*i] > 0)
                .map(|i| self.nodes[i].name.clone())
                .unwrap_or_default();
            return Err(DefinitionError::Cycle(stuck));
        }

        let mut position = vec![0usize; count];
        for (pos, &original) in order.iter().enumerate() {
            position[original] = pos;
        }
        let mut predecessors = vec![Vec::new(); count];
        let mut successors = vec![Vec::new(); count];
        for (from, targets) in outgoing.iter().enumerate() {
            for &to in targets {
                predecessors[position[to]].push(position[from]);
                successors[position[from]].push(position[to]);
            }
        }
        for list in predecessors.iter_mut().chain(successors.iter_mut()) {
            list.sort_unstable();
        }

        let mut slots: Vec<Option<MetaNode>> = self.nodes.into_iter().map(Some).collect();
        let nodes: Vec<MetaNode> = order.iter().filter_map(|&i| slots[i].take()).collect();

        Ok(MetaFlow {
            id: Uuid::new_v4(),
            name: self.name,
            nodes: nodes.into(),
            predecessors: predecessors.into(),
            successors: successors.into(),
        })
    }
}

impl MetaFlow {
    pub fn builder(name: impl Into<String>) -> MetaFlowBuilder {
        MetaFlowBuilder {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Node names in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.name.as_str()).collect()
    }

    pub fn node(&self, name: &str) -> Option<&Arc<dyn Workflow>> {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| &node.workflow)
    }

    fn input_for(&self, index: usize, initial: &Context, records: &[NodeRecord]) -> Option<Context> {
        let preds = &self.predecessors[index];
        if preds.is_empty() {
            return Some(initial.clone());
        }
        let mut contexts = preds.iter().map(|&p| match records[p].outcome {
            NodeOutcome::Completed => records[p].context.clone(),
            _ => None,
        });
        let first = contexts.next()??;
        contexts.try_fold(first, |merged, next| next.map(|ctx| merged.merged(&ctx)))
    }

    async fn run_nodes(
        &self,
        initial: Context,
        start: usize,
        mut records: Vec<NodeRecord>,
        runtime: &Runtime,
    ) -> ExecutionResult {
        for index in start..self.nodes.len() {
            let node = &self.nodes[index];
            if runtime.is_cancelled() {
                info!(meta_flow = %self.name, node = %node.name, "meta flow cancelled");
                let mut cancelled = ExecutionResult::cancelled();
                cancelled.nodes = records;
                return cancelled;
            }
            let Some(input) = self.input_for(index, &initial, &records) else {
                debug!(meta_flow = %self.name, node = %node.name, "skipping node after upstream failure");
                records.push(NodeRecord {
                    name: node.name.clone(),
                    outcome: NodeOutcome::Skipped,
                    status: None,
                    error: None,
                    context: None,
                    output: None,
                });
                continue;
            };

            debug!(meta_flow = %self.name, node = %node.name, kind = node.workflow.kind(), "running node");
            let result = node.workflow.execute(input, runtime).await;
            if let Some(stop) = self.absorb(index, result, &initial, &mut records, runtime) {
                return stop;
            }
        }
        self.complete(initial, records, runtime)
    }

    /// Record a node's result. Returns the meta flow's result when the node stops it.
    fn absorb(
        &self,
        index: usize,
        result: ExecutionResult,
        initial: &Context,
        records: &mut Vec<NodeRecord>,
        runtime: &Runtime,
    ) -> Option<ExecutionResult> {
        let node = &self.nodes[index];
        runtime.emit(
            &self.name,
            "node_finished",
            json!({ "node": node.name, "status": result.status.as_str() }),
        );
        match result.status {
            Status::Success => {
                records.push(NodeRecord {
                    name: node.name.clone(),
                    outcome: NodeOutcome::Completed,
                    status: Some(Status::Success),
                    error: None,
                    context: Some(result.context),
                    output: result.output,
                });
                None
            }
            Status::AwaitingInput => {
                let meta_id = self.id;
                let completed = records.clone();
                let mut paused = result.map_suspension(|inner| Suspension::MetaFlow {
                    meta_id,
                    node: node.name.clone(),
                    initial: initial.clone(),
                    completed,
                    inner: Box::new(inner),
                });
                paused.nodes = std::mem::take(records);
                Some(paused)
            }
            Status::Cancelled => {
                let mut cancelled = result;
                cancelled.nodes = std::mem::take(records);
                Some(cancelled)
            }
            status if node.best_effort => {
                warn!(
                    meta_flow = %self.name,
                    node = %node.name,
                    status = %status,
                    "best-effort node failed, continuing"
                );
                records.push(NodeRecord {
                    name: node.name.clone(),
                    outcome: NodeOutcome::FailedBestEffort,
                    status: Some(status),
                    error: result.error.as_ref().map(|err| err.to_string()),
                    context: Some(result.context),
                    output: result.output,
                });
                None
            }
            status => {
                info!(meta_flow = %self.name, node = %node.name, status = %status, "node halted meta flow");
                records.push(NodeRecord {
                    name: node.name.clone(),
                    outcome: NodeOutcome::Failed,
                    status: Some(status),
                    error: result.error.as_ref().map(|err| err.to_string()),
                    context: None,
                    output: None,
                });
                let mut halted = result;
                halted.nodes = std::mem::take(records);
                Some(halted)
            }
        }
    }

    /// Final context is the merge, in execution order, of every completed node none of whose
    /// successors completed.
    fn complete(&self, initial: Context, records: Vec<NodeRecord>, runtime: &Runtime) -> ExecutionResult {
        let completed_at = |index: usize| records[index].outcome == NodeOutcome::Completed;
        let mut context: Option<Context> = None;
        let mut output = None;
        for (index, record) in records.iter().enumerate() {
            if !completed_at(index) {
                continue;
            }
            if record.output.is_some() {
                output = record.output.clone();
            }
            if !self.successors[index].iter().any(|&succ| completed_at(succ)) {
                if let Some(sink) = &record.context {
                    context = Some(match context {
                        Some(merged) => merged.merged(sink),
                        None => sink.clone(),
                    });
                }
            }
        }

        let mut result = ExecutionResult::success(context.unwrap_or(initial), output);
        let completed = records
            .iter()
            .filter(|record| record.outcome == NodeOutcome::Completed)
            .count();
        info!(
            meta_flow = %self.name,
            completed,
            total = records.len(),
            "meta flow finished"
        );
        runtime.emit(
            &self.name,
            "meta_flow_finished",
            json!({ "meta_id": self.id, "completed": completed, "total": records.len() }),
        );
        result.nodes = records;
        result
    }
}

#[async_trait]
impl Workflow for MetaFlow {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "meta_flow"
    }

    async fn execute(&self, context: Context, runtime: &Runtime) -> ExecutionResult {
        runtime.emit(
            &self.name,
            "meta_flow_started",
            json!({ "meta_id": self.id, "nodes": self.execution_order() }),
        );
        self.run_nodes(context, 0, Vec::new(), runtime).await
    }

    async fn resume(
        &self,
        suspension: Suspension,
        answer: ContextValue,
        runtime: &Runtime,
    ) -> ExecutionResult {
        let (node, initial, completed, inner) = match suspension {
            Suspension::MetaFlow {
                meta_id,
                node,
                initial,
                completed,
                inner,
            } if meta_id == self.id => (node, initial, completed, *inner),
            Suspension::MetaFlow { meta_id, .. } => {
                let err = ResumeError::ForeignDefinition {
                    kind: "meta flow",
                    expected: self.id,
                    actual: meta_id,
                };
                return ExecutionResult::resume_mismatch(&suspension, err);
            }
            other => {
                return ExecutionResult::resume_mismatch(&other, ResumeError::ShapeMismatch("meta flow"))
            }
        };

        let index = self.nodes.iter().position(|candidate| candidate.name == node);
        let Some(index) = index.filter(|&i| i == completed.len()) else {
            let err = ResumeError::StaleStep {
                step_index: completed.len(),
            };
            return ExecutionResult::resume_mismatch(&inner, err);
        };

        debug!(meta_flow = %self.name, node = %node, "meta flow resuming");
        let mut records = completed;
        let result = self.nodes[index]
            .workflow
            .resume(inner, answer, runtime)
            .await;
        if let Some(stop) = self.absorb(index, result, &initial, &mut records, runtime) {
            return stop;
        }
        self.run_nodes(initial, index + 1, records, runtime).await
    }
}

impl GraphExport for MetaFlow {
    fn to_graph(&self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(&self.name);
        for (index, node) in self.nodes.iter().enumerate() {
            let kind = match node.workflow.kind() {
                "unit" => GraphNodeKind::Unit,
                "flow" => GraphNodeKind::Flow,
                "refinement_loop" => GraphNodeKind::RefinementLoop,
                _ => GraphNodeKind::MetaFlow,
            };
            let id = graph.add_node(
                node.name.clone(),
                kind,
                node.workflow.name(),
                Some(node.workflow.to_graph()),
            );
            if let Some(added) = graph.node_mut(&id) {
                added.best_effort = node.best_effort;
            }
            if self.predecessors[index].is_empty() {
                graph.add_edge(START, &id, EdgeCondition::Always);
            }
            if !node.best_effort {
                graph.add_edge(&id, END, EdgeCondition::Failure);
            }
            graph.add_edge(&id, END, EdgeCondition::AwaitingInput);
        }
        for (index, node) in self.nodes.iter().enumerate() {
            let successors = &self.successors[index];
            if successors.is_empty() {
                graph.add_edge(&node.name, END, EdgeCondition::Success);
            }
            for &succ in successors {
                graph.add_edge(&node.name, &self.nodes[succ].name, EdgeCondition::Success);
            }
        }
        graph
    }
}
