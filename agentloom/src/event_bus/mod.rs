//! Structured progress events from graph nodes and the workflow runtime.
//!
//! The bus decouples event producers (nodes, the scheduler, the workflow
//! executor) from consumers (stdout logs, test captures, streaming clients).
//! Producers hold a cheap [`flume::Sender`]; the forwarding task spawned at
//! construction fans each event out to every [`EventSink`] and winds down
//! by itself once the last sender is dropped.

mod bus;
mod event;
mod sink;

pub use bus::EventBus;
pub use event::{DiagnosticEvent, Event, NodeEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
