use crate::event_bus::Event;
use miette::Diagnostic;
use thiserror::Error;

/// State record carried through a graph run.
///
/// Each graph defines one typed record implementing this trait. The two
/// accessors back the runtime's bookkeeping: `steps_completed` is appended
/// by the executor after each node returns, `warnings` accumulates
/// non-fatal degradations that nodes chose to continue past.
pub trait GraphState: Clone + Send + Sync + 'static {
    fn steps_completed(&self) -> &[String];
    fn record_step(&mut self, name: &str);
    fn warnings(&self) -> &[String];
    fn add_warning(&mut self, warning: String);
}

/// Errors that can occur when using [`NodeContext`] methods.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    /// Event could not be sent because the bus is disconnected.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(agentloom::graph::event_bus_unavailable),
        help("The event bus may be disconnected. Check runner wiring.")
    )]
    EventBusUnavailable,
}

/// Execution context handed to a node for a single invocation.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Name of the node being executed.
    pub node: String,
    /// Zero-based position of this node within the current run.
    pub step: u64,
    /// Channel for emitting structured progress events.
    pub event_sender: flume::Sender<Event>,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_sender
            .send(Event::node_message_with_meta(
                self.node.clone(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }
}

/// A single unit of reasoning within a graph.
///
/// Nodes receive the state by value and return the next state; fields they
/// do not touch carry forward unchanged. Raising an error terminates the
/// run — retries are the enclosing workflow's concern, never the graph's.
/// For degradations that should not stop the run, add a warning to the
/// state and continue.
#[async_trait::async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    async fn run(&self, state: S, ctx: NodeContext) -> Result<S, NodeError>;
}

/// Fatal node failures that terminate the graph run.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the state.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(agentloom::graph::missing_input),
        help("Check that an earlier node produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(agentloom::graph::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON (de)serialization error.
    #[error(transparent)]
    #[diagnostic(code(agentloom::graph::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(agentloom::graph::validation))]
    ValidationFailed(String),

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(agentloom::graph::event_bus))]
    EventBus(#[from] NodeContextError),
}
