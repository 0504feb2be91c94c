use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifies a node within a graph.
///
/// `Start` and `End` are virtual endpoints: they are never executed and
/// never registered, they only anchor the topology. Every graph has exactly
/// one edge leaving `Start` (the entry) and reaches `End` on every path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Start,
    End,
    Custom(String),
}

impl NodeKind {
    /// Encode into the persisted string form (`"Start"`, `"End"`, `"Custom:x"`).
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form. Unknown formats fall back to `Custom`.
    #[must_use]
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, NodeKind::End)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Start => write!(f, "Start"),
            NodeKind::End => write!(f, "End"),
            NodeKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

/// Structural validation errors raised by [`GraphBuilder::compile`](super::GraphBuilder::compile).
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph has no entry: add exactly one edge from Start")]
    #[diagnostic(code(agentloom::graph::missing_entry))]
    MissingEntry,

    #[error("graph has {count} entry edges from Start; exactly one is required")]
    #[diagnostic(code(agentloom::graph::multiple_entries))]
    MultipleEntries { count: usize },

    #[error("edge references undeclared node: {name}")]
    #[diagnostic(
        code(agentloom::graph::dangling_edge),
        help("Register the node with add_node before wiring edges to it.")
    )]
    DanglingEdge { name: String },

    #[error("node {name} is unreachable from the entry")]
    #[diagnostic(code(agentloom::graph::unreachable_node))]
    UnreachableNode { name: String },

    #[error("node {name} has no outgoing edge; every path must reach End")]
    #[diagnostic(code(agentloom::graph::no_successor))]
    NoSuccessor { name: String },

    #[error("node {name} has more than one outgoing edge; execution is sequential")]
    #[diagnostic(code(agentloom::graph::ambiguous_successor))]
    AmbiguousSuccessor { name: String },

    #[error("conditional edge from {from} routes label {label:?} to undeclared node {target}")]
    #[diagnostic(code(agentloom::graph::unknown_router_target))]
    UnknownRouterTarget {
        from: String,
        label: String,
        target: String,
    },

    #[error("static edges form a cycle through {name}")]
    #[diagnostic(code(agentloom::graph::cycle))]
    Cycle { name: String },

    #[error("cannot register virtual node kind {name}")]
    #[diagnostic(code(agentloom::graph::virtual_node))]
    VirtualNode { name: String },
}
