use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

/// Lifecycle state of a listener.
///
/// `Unbound -> Listening -> Closed`, with `Error` reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Listening,
    Closed,
    Error,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Unbound => "unbound",
            ListenerState::Listening => "listening",
            ListenerState::Closed => "closed",
            ListenerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Core trait for a running input endpoint
#[async_trait]
pub trait Listener: Send + Sync {
    /// Stop accepting and release the socket
    async fn stop(&mut self) -> Result<(), ListenerError>;

    /// Get listener bind address
    fn bind_address(&self) -> SocketAddr;

    /// Current lifecycle state
    fn state(&self) -> ListenerState;
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Listener is already listening")]
    AlreadyListening,
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),
    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),
    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

impl ListenerError {
    pub fn is_addr_in_use(&self) -> bool {
        matches!(
            self,
            ListenerError::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse
        )
    }
}
