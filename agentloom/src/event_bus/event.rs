use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured event emitted during graph or workflow execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Node(NodeEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    /// Node-scoped event without execution metadata.
    pub fn node_message(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Node(NodeEvent {
            node: None,
            step: None,
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// Node-scoped event enriched with the node name and step index.
    pub fn node_message_with_meta(
        node: impl Into<String>,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Node(NodeEvent {
            node: Some(node.into()),
            step: Some(step),
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// Runtime-scoped diagnostic (scheduler firings, worker retries, …).
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        match self {
            Event::Node(e) => &e.scope,
            Event::Diagnostic(e) => &e.scope,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Event::Node(e) => &e.message,
            Event::Diagnostic(e) => &e.message,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Node(e) => match (&e.node, e.step) {
                (Some(node), Some(step)) => {
                    write!(f, "[{node}@{step}] {}: {}", e.scope, e.message)
                }
                (Some(node), None) => write!(f, "[{node}] {}: {}", e.scope, e.message),
                _ => write!(f, "{}: {}", e.scope, e.message),
            },
            Event::Diagnostic(e) => write!(f, "{}: {}", e.scope, e.message),
        }
    }
}

/// Event produced by a graph node via [`NodeContext::emit`](crate::graph::NodeContext::emit).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEvent {
    pub node: Option<String>,
    pub step: Option<u64>,
    pub scope: String,
    pub message: String,
}

/// Event produced by runtime components outside any node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
}
