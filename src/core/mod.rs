pub mod event;
pub mod listener;
pub mod metrics;
pub mod sink;

// Re-export core traits
pub use event::{ConnectionInfo, ListenerEvent};
pub use listener::{Listener, ListenerError, ListenerState};
pub use metrics::{ListenerMetrics, MetricsSnapshot};
pub use sink::{ChannelSink, EventSink, FanoutSink, LogSink};
