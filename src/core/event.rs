use std::fmt;
use std::net::SocketAddr;

pub const LISTENING_MESSAGE: &str = "listening-开始监听";
pub const CONNECTION_MESSAGE: &str = "connection-收到连接";
pub const CLOSED_MESSAGE: &str = "close-关闭服务";
pub const ERROR_MESSAGE: &str = "error-服务错误";

/// Line logged once the socket is bound, naming the port ("listening on port N here")
pub fn bind_message(port: u16) -> String {
    format!("此处监听{}端口", port)
}

/// Description of an accepted peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Sequence number, starting at 1 for each listener
    pub id: u64,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
}

/// Lifecycle notification emitted by a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Listening { local_addr: SocketAddr },
    Connection(ConnectionInfo),
    Closed,
    Error { message: String },
}

impl ListenerEvent {
    /// Fixed log line for this kind of event
    pub fn message(&self) -> &'static str {
        match self {
            ListenerEvent::Listening { .. } => LISTENING_MESSAGE,
            ListenerEvent::Connection(_) => CONNECTION_MESSAGE,
            ListenerEvent::Closed => CLOSED_MESSAGE,
            ListenerEvent::Error { .. } => ERROR_MESSAGE,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ListenerEvent::Error { .. })
    }
}

impl fmt::Display for ListenerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerEvent::Listening { local_addr } => {
                write!(f, "{} on {}", self.message(), local_addr)
            }
            ListenerEvent::Connection(info) => write!(
                f,
                "{} #{} from {} on {}",
                self.message(),
                info.id,
                info.peer_addr,
                info.local_addr
            ),
            ListenerEvent::Closed => f.write_str(self.message()),
            ListenerEvent::Error { message } => write!(f, "{}: {}", self.message(), message),
        }
    }
}
