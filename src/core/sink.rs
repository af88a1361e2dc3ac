use crate::core::event::{bind_message, ListenerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Receiver of listener lifecycle events.
///
/// `emit` is called from the accept task, in the order events happen, and
/// must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ListenerEvent);
}

/// Writes every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &ListenerEvent) {
        match event {
            ListenerEvent::Listening { local_addr } => {
                info!("{}", bind_message(local_addr.port()));
                info!(address = %local_addr, "{}", event.message());
            }
            ListenerEvent::Connection(conn) => {
                info!(
                    id = conn.id,
                    peer = %conn.peer_addr,
                    "{}",
                    event.message()
                );
                debug!(id = conn.id, local = %conn.local_addr, "Connection left unread");
            }
            ListenerEvent::Closed => {
                info!("{}", event.message());
            }
            ListenerEvent::Error { message } => {
                error!(cause = %message, "{}", event.message());
            }
        }
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ListenerEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ListenerEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ListenerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &ListenerEvent) {
        // Receiver gone means nobody is watching any more
        let _ = self.tx.send(event.clone());
    }
}

/// Delivers each event to several sinks, in insertion order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &ListenerEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
