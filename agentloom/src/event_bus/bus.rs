use tokio::task::JoinHandle;

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Fans events out from producers to a fixed set of sinks.
///
/// The bus spawns its forwarding task at construction; the task owns the
/// sinks outright and delivers each event to all of them in registration
/// order. Producers hold cheap sender clones from [`EventBus::get_sender`].
/// The task ends on its own once every sender (the bus's included) is
/// gone, so an `EventBus` that simply goes out of scope leaks nothing —
/// call [`EventBus::shutdown`] when queued events must be drained before
/// proceeding.
///
/// Must be constructed inside a tokio runtime.
pub struct EventBus {
    sender: flume::Sender<Event>,
    forwarder: JoinHandle<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Create a bus delivering to a single sink.
    pub fn with_sink<T: EventSink + 'static>(sink: T) -> Self {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Create a bus delivering to the given sinks, in order.
    #[must_use]
    pub fn with_sinks(mut sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (sender, receiver) = flume::unbounded::<Event>();
        let forwarder = tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.handle(&event) {
                        tracing::warn!(error = %e, "event sink failed");
                    }
                }
            }
        });
        Self { sender, forwarder }
    }

    /// Clone of the sender side for producers.
    #[must_use]
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.sender.clone()
    }

    /// Emit one event through the bus's own sender. A closed channel is
    /// not an error for the producer side.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Drop the bus's sender and wait for the forwarder to drain.
    ///
    /// Completes once every outstanding sender clone is dropped and the
    /// queue is empty; callers that handed senders to long-lived tasks
    /// must stop those first.
    pub async fn shutdown(self) {
        let EventBus { sender, forwarder } = self;
        drop(sender);
        let _ = forwarder.await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::sink::MemorySink;
    use super::*;

    #[tokio::test]
    async fn events_reach_sinks_in_order() {
        let captured = MemorySink::new();
        let bus = EventBus::with_sink(captured.clone());

        bus.emit(Event::diagnostic("test", "one"));
        let sender = bus.get_sender();
        sender
            .send(Event::node_message_with_meta("n", 1, "test", "two"))
            .unwrap();

        drop(sender);
        bus.shutdown().await;

        let events = captured.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message(), "one");
        assert_eq!(events[1].message(), "two");
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events() {
        let captured = MemorySink::new();
        let bus = EventBus::with_sink(captured.clone());
        for i in 0..100 {
            bus.emit(Event::diagnostic("burst", format!("event {i}")));
        }
        bus.shutdown().await;
        assert_eq!(captured.snapshot().len(), 100);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        struct BrokenSink;
        impl super::super::sink::EventSink for BrokenSink {
            fn handle(&mut self, _event: &Event) -> std::io::Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "sink down"))
            }
        }

        let captured = MemorySink::new();
        let bus = EventBus::with_sinks(vec![Box::new(BrokenSink), Box::new(captured.clone())]);
        bus.emit(Event::diagnostic("test", "still delivered"));
        bus.shutdown().await;

        let events = captured.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message(), "still delivered");
    }
}
