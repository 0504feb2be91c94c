use rustc_hash::FxHashMap;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::event_bus::Event;

use super::builder::ConditionalEdge;
use super::node::{GraphState, Node, NodeContext, NodeError};
use super::types::NodeKind;

/// A compiled, executable graph.
///
/// Cheap to clone behind `Arc`; a single `Graph` is shared across activity
/// invocations and evaluation runs.
pub struct Graph<S> {
    nodes: FxHashMap<NodeKind, Arc<dyn Node<S>>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: FxHashMap<NodeKind, ConditionalEdge<S>>,
    entry: NodeKind,
    max_steps: u64,
}

/// A graph run that failed, carrying the failing node and its error.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphRunError {
    #[error("node {node} failed: {source}")]
    #[diagnostic(code(agentloom::graph::node_failed))]
    NodeFailed {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("router at {node} returned undeclared label {label:?}")]
    #[diagnostic(code(agentloom::graph::undeclared_label))]
    UndeclaredLabel { node: String, label: String },

    #[error("run exceeded {max_steps} steps at node {node}; routing likely loops")]
    #[diagnostic(code(agentloom::graph::step_budget))]
    StepBudgetExceeded { node: String, max_steps: u64 },
}

impl<S: GraphState> Graph<S> {
    pub(super) fn from_parts(
        nodes: FxHashMap<NodeKind, Arc<dyn Node<S>>>,
        edges: FxHashMap<NodeKind, Vec<NodeKind>>,
        conditional_edges: FxHashMap<NodeKind, ConditionalEdge<S>>,
        entry: NodeKind,
        max_steps: u64,
    ) -> Self {
        Self {
            nodes,
            edges,
            conditional_edges,
            entry,
            max_steps,
        }
    }

    /// Name of the entry node.
    #[must_use]
    pub fn entry(&self) -> &NodeKind {
        &self.entry
    }

    /// Names of all registered nodes.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.keys().map(ToString::to_string).collect()
    }

    /// Execute the graph from `initial` until a terminal edge reaches `End`.
    ///
    /// Nodes run sequentially; after each node returns, its name is appended
    /// to `steps_completed` and the outgoing edge (static or routed) picks
    /// the next node. A node error stops the run immediately — no retries.
    #[instrument(skip(self, initial, event_sender), err)]
    pub async fn run(
        &self,
        initial: S,
        event_sender: flume::Sender<Event>,
    ) -> Result<S, GraphRunError> {
        let mut state = initial;
        let mut current = self.entry.clone();
        let mut step: u64 = 0;

        while !current.is_end() {
            if step >= self.max_steps {
                return Err(GraphRunError::StepBudgetExceeded {
                    node: current.to_string(),
                    max_steps: self.max_steps,
                });
            }

            let name = current.to_string();
            let node = self
                .nodes
                .get(&current)
                .expect("compile() guarantees every routed node is registered");

            let ctx = NodeContext {
                node: name.clone(),
                step,
                event_sender: event_sender.clone(),
            };

            state = node
                .run(state, ctx)
                .await
                .map_err(|source| GraphRunError::NodeFailed {
                    node: name.clone(),
                    source,
                })?;
            state.record_step(&name);
            step += 1;

            current = self.next_node(&current, &state)?;
        }

        Ok(state)
    }

    fn next_node(&self, from: &NodeKind, state: &S) -> Result<NodeKind, GraphRunError> {
        if let Some(edge) = self.conditional_edges.get(from) {
            let label = (edge.router)(state);
            return edge
                .targets
                .get(&label)
                .cloned()
                .ok_or_else(|| GraphRunError::UndeclaredLabel {
                    node: from.to_string(),
                    label,
                });
        }
        let next = self
            .edges
            .get(from)
            .and_then(|tos| tos.first())
            .cloned()
            .expect("compile() guarantees exactly one successor");
        Ok(next)
    }
}
