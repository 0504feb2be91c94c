//! Typed DAG runtime for agent reasoning.
//!
//! A graph is a set of named nodes over a single typed state record, a
//! single entry edge from [`NodeKind::Start`], static edges, and conditional
//! edges whose router inspects the post-node state and returns a label.
//! Execution is strictly sequential within a run; nondeterminism lives in
//! the nodes (LLM calls, memory searches), which is why graph runs happen
//! inside workflow activities and are never replayed directly.
//!
//! # Building a graph
//!
//! ```rust,no_run
//! use agentloom::graph::{GraphBuilder, GraphState, Node, NodeContext, NodeError, NodeKind};
//! use async_trait::async_trait;
//!
//! #[derive(Clone, Default)]
//! struct CountState {
//!     count: u32,
//!     steps_completed: Vec<String>,
//!     warnings: Vec<String>,
//! }
//!
//! impl GraphState for CountState {
//!     fn steps_completed(&self) -> &[String] { &self.steps_completed }
//!     fn record_step(&mut self, name: &str) { self.steps_completed.push(name.to_string()); }
//!     fn warnings(&self) -> &[String] { &self.warnings }
//!     fn add_warning(&mut self, warning: String) { self.warnings.push(warning); }
//! }
//!
//! struct Increment;
//!
//! #[async_trait]
//! impl Node<CountState> for Increment {
//!     async fn run(&self, mut state: CountState, _ctx: NodeContext) -> Result<CountState, NodeError> {
//!         state.count += 1;
//!         Ok(state)
//!     }
//! }
//!
//! let graph = GraphBuilder::new()
//!     .add_node("increment", Increment)
//!     .add_edge(NodeKind::Start, "increment".into())
//!     .add_edge("increment".into(), NodeKind::End)
//!     .compile()
//!     .unwrap();
//! ```

mod builder;
mod executor;
mod node;
mod types;

pub use builder::{ConditionalEdge, GraphBuilder, RouterFn};
pub use executor::{Graph, GraphRunError};
pub use node::{GraphState, Node, NodeContext, NodeContextError, NodeError};
pub use types::{GraphError, NodeKind};
