use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use super::executor::Graph;
use super::node::{GraphState, Node};
use super::types::{GraphError, NodeKind};

/// Router function for conditional edges.
///
/// Evaluated against the state returned by the source node; the returned
/// label selects the next node from the targets declared on the edge.
pub type RouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// A conditional edge: a router plus its declared label → node mapping.
///
/// Every label the router can return must be declared here; compile-time
/// validation checks each mapped target against the node registry.
#[derive(Clone)]
pub struct ConditionalEdge<S> {
    pub(super) router: RouterFn<S>,
    pub(super) targets: FxHashMap<String, NodeKind>,
}

/// Fluent builder for workflow graphs.
///
/// Required configuration:
/// - at least one node registered via [`add_node`](Self::add_node)
/// - exactly one edge from [`NodeKind::Start`] (the entry)
/// - every path reaches [`NodeKind::End`]
///
/// `Start` and `End` are virtual: attempts to register them as nodes fail
/// at compile time.
pub struct GraphBuilder<S> {
    nodes: FxHashMap<NodeKind, Arc<dyn Node<S>>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: FxHashMap<NodeKind, ConditionalEdge<S>>,
    max_steps: u64,
}

impl<S: GraphState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> GraphBuilder<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional_edges: FxHashMap::default(),
            max_steps: 256,
        }
    }

    /// Register a node under the given name.
    #[must_use]
    pub fn add_node(mut self, name: &str, node: impl Node<S> + 'static) -> Self {
        self.nodes
            .insert(NodeKind::Custom(name.to_string()), Arc::new(node));
        self
    }

    /// Add a static (unconditional) edge.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    /// Add a conditional edge: after `from` completes, `router` is evaluated
    /// against the new state and its label picks the next node.
    ///
    /// `targets` declares every label the router may return, mapped to the
    /// destination node (or `End`).
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: NodeKind,
        router: RouterFn<S>,
        targets: &[(&str, NodeKind)],
    ) -> Self {
        let targets = targets
            .iter()
            .map(|(label, to)| (label.to_string(), to.clone()))
            .collect();
        self.conditional_edges
            .insert(from, ConditionalEdge { router, targets });
        self
    }

    /// Guard against runaway routing; the default (256) is far above any
    /// declared graph in this workspace.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Validate the topology and produce an executable [`Graph`].
    ///
    /// Checks, in order: no virtual nodes registered, exactly one entry edge,
    /// no dangling edge targets, every router label maps to a declared node,
    /// each node has exactly one outgoing edge (static or conditional),
    /// every node is reachable from the entry, and static edges are acyclic.
    pub fn compile(self) -> Result<Graph<S>, GraphError> {
        for kind in self.nodes.keys() {
            if !matches!(kind, NodeKind::Custom(_)) {
                return Err(GraphError::VirtualNode {
                    name: kind.to_string(),
                });
            }
        }

        let entries = self.edges.get(&NodeKind::Start).cloned().unwrap_or_default();
        let entry = match entries.len() {
            0 => return Err(GraphError::MissingEntry),
            1 => entries[0].clone(),
            n => return Err(GraphError::MultipleEntries { count: n }),
        };

        // Every edge endpoint must be a declared node or a virtual endpoint.
        let declared = |kind: &NodeKind| -> bool {
            matches!(kind, NodeKind::Start | NodeKind::End) || self.nodes.contains_key(kind)
        };
        for (from, tos) in &self.edges {
            if !declared(from) {
                return Err(GraphError::DanglingEdge {
                    name: from.to_string(),
                });
            }
            for to in tos {
                if !declared(to) {
                    return Err(GraphError::DanglingEdge {
                        name: to.to_string(),
                    });
                }
            }
        }
        for (from, edge) in &self.conditional_edges {
            if !declared(from) {
                return Err(GraphError::DanglingEdge {
                    name: from.to_string(),
                });
            }
            for (label, target) in &edge.targets {
                if !declared(target) {
                    return Err(GraphError::UnknownRouterTarget {
                        from: from.to_string(),
                        label: label.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        // Exactly one way out of every executable node.
        for kind in self.nodes.keys() {
            let static_out = self.edges.get(kind).map_or(0, Vec::len);
            let conditional_out = usize::from(self.conditional_edges.contains_key(kind));
            match static_out + conditional_out {
                0 => {
                    return Err(GraphError::NoSuccessor {
                        name: kind.to_string(),
                    })
                }
                1 => {}
                _ => {
                    return Err(GraphError::AmbiguousSuccessor {
                        name: kind.to_string(),
                    })
                }
            }
        }

        // Reachability from the entry across both edge kinds.
        let mut reachable: FxHashSet<NodeKind> = FxHashSet::default();
        let mut stack = vec![entry.clone()];
        while let Some(kind) = stack.pop() {
            if kind.is_end() || !reachable.insert(kind.clone()) {
                continue;
            }
            if let Some(tos) = self.edges.get(&kind) {
                stack.extend(tos.iter().cloned());
            }
            if let Some(edge) = self.conditional_edges.get(&kind) {
                stack.extend(edge.targets.values().cloned());
            }
        }
        for kind in self.nodes.keys() {
            if !reachable.contains(kind) {
                return Err(GraphError::UnreachableNode {
                    name: kind.to_string(),
                });
            }
        }

        // Static edges must not form a cycle (routers may loop; the executor
        // bounds those with max_steps).
        self.check_static_acyclic()?;

        Ok(Graph::from_parts(
            self.nodes,
            self.edges,
            self.conditional_edges,
            entry,
            self.max_steps,
        ))
    }

    fn check_static_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: FxHashMap<NodeKind, Mark> = FxHashMap::default();

        fn visit(
            kind: &NodeKind,
            edges: &FxHashMap<NodeKind, Vec<NodeKind>>,
            marks: &mut FxHashMap<NodeKind, Mark>,
        ) -> Result<(), GraphError> {
            if kind.is_end() {
                return Ok(());
            }
            match marks.get(kind) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(GraphError::Cycle {
                        name: kind.to_string(),
                    })
                }
                None => {}
            }
            marks.insert(kind.clone(), Mark::Visiting);
            if let Some(tos) = edges.get(kind) {
                for to in tos {
                    visit(to, edges, marks)?;
                }
            }
            marks.insert(kind.clone(), Mark::Done);
            Ok(())
        }

        for from in self.edges.keys() {
            visit(from, &self.edges, &mut marks)?;
        }
        Ok(())
    }
}
