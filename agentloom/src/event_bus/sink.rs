use std::io::{self, Result as IoResult, Stdout, Write};
use std::sync::{Arc, Mutex};

use super::event::Event;

/// Abstraction over an output target that consumes full [`Event`] objects.
pub trait EventSink: Send + Sync {
    fn handle(&mut self, event: &Event) -> IoResult<()>;
}

/// Line-oriented stdout sink.
pub struct StdOutSink {
    handle: Stdout,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
        }
    }
}

impl EventSink for StdOutSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        writeln!(self.handle, "{event}")?;
        self.handle.flush()
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().expect("memory sink poisoned").clone()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("memory sink poisoned").clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        self.entries
            .lock()
            .expect("memory sink poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events into a flume channel for async consumers (SSE, dashboards).
pub struct ChannelSink {
    tx: flume::Sender<Event>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        // A closed receiver is not an error for the producer side.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}
