use crate::config::{Config, ConnectionPolicy, ListenerConfig};
use crate::core::event::{ConnectionInfo, ListenerEvent};
use crate::core::listener::{Listener, ListenerError, ListenerState};
use crate::core::metrics::ListenerMetrics;
use crate::core::sink::EventSink;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bind a non-blocking listening socket with the configured backlog
fn bind_listener(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .map_err(|_| ListenerError::InvalidAddress(config.bind.clone()))?;
    let bind_err = |source: std::io::Error| ListenerError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    // Windows lets SO_REUSEADDR steal a port that is already listening
    if cfg!(unix) {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(bind_err)?;

    TcpListener::from_std(socket.into()).map_err(bind_err)
}

/// An unbound listener: configuration plus the sink that hears about it
pub struct HarkServer {
    config: ListenerConfig,
    sink: Arc<dyn EventSink>,
    state: Arc<watch::Sender<ListenerState>>,
}

impl HarkServer {
    pub fn new(config: &Config, sink: Arc<dyn EventSink>) -> Self {
        let (state, _) = watch::channel(ListenerState::Unbound);
        Self {
            config: config.listener.clone(),
            sink,
            state: Arc::new(state),
        }
    }

    pub fn bind_address(&self) -> &str {
        &self.config.bind
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Bind the socket and start accepting on a background task.
    ///
    /// Emits `Listening` on success. On failure emits `Error`, moves to the
    /// error state and hands the error back; nothing is retried. A server
    /// whose previous run is still listening refuses to start again. Must be
    /// called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<ListenerHandle, ListenerError> {
        if self.state() == ListenerState::Listening {
            return Err(ListenerError::AlreadyListening);
        }

        info!("Listener binding to: {}", self.config.bind);

        let listener = match bind_listener(&self.config) {
            Ok(listener) => listener,
            Err(e) => return Err(self.fail(e)),
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(self.fail(ListenerError::LocalAddr(e))),
        };

        self.state.send_replace(ListenerState::Listening);
        self.sink.emit(&ListenerEvent::Listening { local_addr });

        let metrics = Arc::new(ListenerMetrics::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_loop = AcceptLoop {
            listener,
            local_addr,
            policy: self.config.on_connection,
            sink: Arc::clone(&self.sink),
            metrics: Arc::clone(&metrics),
            state: Arc::clone(&self.state),
            held: JoinSet::new(),
            next_id: 1,
        };
        let task = tokio::spawn(accept_loop.run(shutdown_rx));

        Ok(ListenerHandle {
            local_addr,
            state: self.state.subscribe(),
            metrics,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    fn fail(&self, e: ListenerError) -> ListenerError {
        self.state.send_replace(ListenerState::Error);
        self.sink.emit(&ListenerEvent::Error {
            message: e.to_string(),
        });
        e
    }
}

/// A running listener.
///
/// Dropping the handle without `close` still stops the accept task, which
/// then reports `Closed` on its own.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    state: watch::Receiver<ListenerState>,
    metrics: Arc<ListenerMetrics>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Counters for this run; still readable after close
    pub fn metrics(&self) -> Arc<ListenerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Close the listening socket and every held connection
    pub async fn close(mut self) -> Result<(), ListenerError> {
        self.stop().await
    }
}

#[async_trait]
impl Listener for ListenerHandle {
    async fn stop(&mut self) -> Result<(), ListenerError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Accept task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn bind_address(&self) -> SocketAddr {
        self.local_addr
    }

    fn state(&self) -> ListenerState {
        *self.state.borrow()
    }
}

struct AcceptLoop {
    listener: TcpListener,
    local_addr: SocketAddr,
    policy: ConnectionPolicy,
    sink: Arc<dyn EventSink>,
    metrics: Arc<ListenerMetrics>,
    state: Arc<watch::Sender<ListenerState>>,
    held: JoinSet<()>,
    next_id: u64,
}

impl AcceptLoop {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        debug!(address = %self.local_addr, "Accepting connections");

        loop {
            tokio::select! {
                biased;
                // Fires on an explicit close and when the handle is dropped
                _ = &mut shutdown => break,
                // Collect holders whose peer has already gone
                Some(_) = self.held.join_next(), if !self.held.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.on_connection(stream, peer_addr),
                    Err(e) => {
                        self.on_accept_error(e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        self.close().await;
    }

    fn on_connection(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        let info = ConnectionInfo {
            id: self.next_id,
            peer_addr,
            local_addr: self.local_addr,
        };
        self.next_id += 1;

        self.metrics.record_accept();
        match self.policy {
            ConnectionPolicy::Hold => {
                self.metrics.increment_held();
                self.held
                    .spawn(hold_until_peer_closes(stream, info.id, Arc::clone(&self.metrics)));
            }
            ConnectionPolicy::Drop => drop(stream),
        }

        self.sink.emit(&ListenerEvent::Connection(info));
    }

    fn on_accept_error(&self, e: std::io::Error) {
        self.metrics.record_accept_error();
        self.sink.emit(&ListenerEvent::Error {
            message: ListenerError::Accept(e).to_string(),
        });
    }

    async fn close(self) {
        let AcceptLoop {
            listener,
            sink,
            metrics,
            state,
            mut held,
            ..
        } = self;

        drop(listener);
        // Aborting a holder drops its socket
        held.shutdown().await;
        let released = metrics.release_all_held();

        if released > 0 {
            debug!("Released {} held connections", released);
        }

        state.send_replace(ListenerState::Closed);
        sink.emit(&ListenerEvent::Closed);
    }
}

/// Keep an accepted socket open, unread, until its peer hangs up.
///
/// Readiness is cleared after every wakeup without consuming bytes, so data
/// the peer sends only wakes the task once per arrival.
async fn hold_until_peer_closes(stream: TcpStream, id: u64, metrics: Arc<ListenerMetrics>) {
    loop {
        match stream.ready(Interest::READABLE).await {
            Ok(ready) if ready.is_read_closed() => break,
            Ok(_) => {
                let _ = stream.try_io(Interest::READABLE, || {
                    Err::<(), _>(std::io::ErrorKind::WouldBlock.into())
                });
            }
            Err(_) => break,
        }
    }

    drop(stream);
    metrics.release_held(1);
    debug!(id, "Held connection closed by peer");
}
