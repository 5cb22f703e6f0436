//! TCP transport with bounded accept.
//!
//! # Responsibilities
//! - Bind sockets with SO_REUSEADDR (and optionally SO_REUSEPORT)
//! - Run a configurable number of accept tasks per address
//! - Enforce max_connections per address via semaphore
//! - Hand accepted connections to the RPC connection layer

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::RpcOptions;
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
use crate::net::transport::{ListeningHandle, Transport, TransportError};

const DEFAULT_BACKLOG: i32 = 1024;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receives every accepted connection.
///
/// The handler owns the RPC wire protocol; it must not block the accept task.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, connection: AcceptedConnection);
}

/// A connection accepted by one of the listener's accept tasks.
///
/// Dropping it releases the connection slot.
#[derive(Debug)]
pub struct AcceptedConnection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    guard: ConnectionGuard,
    _permit: OwnedSemaphorePermit,
}

impl AcceptedConnection {
    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// accept tasks wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
}

impl Listener {
    fn new(inner: TcpListener, max_connections: usize) -> io::Result<Self> {
        let local_addr = inner.local_addr()?;
        Ok(Self {
            inner,
            local_addr,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            tracker: ConnectionTracker::new(local_addr.to_string()),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    pub async fn accept(&self) -> io::Result<AcceptedConnection> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limit semaphore closed"))?;

        let (stream, peer_addr) = self.inner.accept().await?;
        let guard = self.tracker.track();

        tracing::debug!(
            peer_addr = %peer_addr,
            connection_id = %guard.id(),
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(AcceptedConnection {
            stream,
            peer_addr,
            local_addr: self.local_addr,
            guard,
            _permit: permit,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently held open.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

/// [`Transport`] backed by real sockets on a tokio runtime.
pub struct TcpTransport {
    runtime: Handle,
    handler: Arc<dyn ConnectionHandler>,
    reuse_port: bool,
    max_connections: usize,
    backlog: i32,
}

impl TcpTransport {
    pub fn new(runtime: Handle, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            runtime,
            handler,
            reuse_port: false,
            max_connections: RpcOptions::default().max_connections_per_address,
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Build a transport using the socket settings from `opts`.
    pub fn from_options(
        runtime: Handle,
        handler: Arc<dyn ConnectionHandler>,
        opts: &RpcOptions,
    ) -> Self {
        Self::new(runtime, handler)
            .with_reuse_port(opts.reuse_port)
            .with_max_connections(opts.max_connections_per_address)
    }

    #[must_use]
    pub fn with_reuse_port(mut self, enable: bool) -> Self {
        self.reuse_port = enable;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }
}

impl Transport for TcpTransport {
    fn create_listening_handle(
        &self,
        addr: SocketAddr,
    ) -> Result<Box<dyn ListeningHandle>, TransportError> {
        let std_listener = bind_socket(addr, self.reuse_port, self.backlog)?;

        let _enter = self.runtime.enter();
        let listener = TcpListener::from_std(std_listener)
            .and_then(|inner| Listener::new(inner, self.max_connections))
            .map_err(|source| TransportError::Socket { addr, source })?;

        tracing::info!(
            requested = %addr,
            address = %listener.local_addr(),
            reuse_port = self.reuse_port,
            max_connections = self.max_connections,
            "Listener bound"
        );

        Ok(Box::new(TcpListeningHandle {
            addr: listener.local_addr(),
            listener: Some(Arc::new(listener)),
            runtime: self.runtime.clone(),
            handler: Arc::clone(&self.handler),
            acceptors: Vec::new(),
        }))
    }
}

fn bind_socket(
    addr: SocketAddr,
    reuse_port: bool,
    backlog: i32,
) -> Result<std::net::TcpListener, TransportError> {
    let socket_err = |source: io::Error| TransportError::Socket { addr, source };
    let bind_err = |source: io::Error| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(socket_err)?;
    socket.set_reuse_address(true).map_err(socket_err)?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    if reuse_port {
        socket.set_reuse_port(true).map_err(socket_err)?;
    }
    #[cfg(not(all(unix, not(target_os = "solaris"), not(target_os = "illumos"))))]
    if reuse_port {
        tracing::warn!(address = %addr, "SO_REUSEPORT is not supported on this platform");
    }

    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(socket_err)?;
    Ok(socket.into())
}

/// Handle over one bound listener and its accept tasks.
struct TcpListeningHandle {
    addr: SocketAddr,
    /// `None` once stopped; the socket closes when the last task lets go.
    listener: Option<Arc<Listener>>,
    runtime: Handle,
    handler: Arc<dyn ConnectionHandler>,
    acceptors: Vec<JoinHandle<()>>,
}

impl ListeningHandle for TcpListeningHandle {
    fn start(&mut self, acceptors: usize) -> Result<(), TransportError> {
        let addr = self.addr;
        let Some(listener) = self.listener.as_ref().map(Arc::clone) else {
            return Err(TransportError::Stopped { addr });
        };
        if !self.acceptors.is_empty() {
            return Ok(());
        }
        if acceptors == 0 {
            return Err(TransportError::Start {
                addr,
                reason: "at least one acceptor is required".to_string(),
            });
        }

        for acceptor in 0..acceptors {
            let task = run_accept_loop(Arc::clone(&listener), Arc::clone(&self.handler), acceptor);
            self.acceptors.push(self.runtime.spawn(task));
        }
        tracing::info!(address = %addr, acceptors, "Listener accepting connections");
        Ok(())
    }

    fn stop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        for task in self.acceptors.drain(..) {
            task.abort();
        }
        tracing::info!(
            address = %listener.local_addr(),
            active_connections = listener.active_connections(),
            "Listener stopped"
        );
    }

    fn bound_address(&self) -> Result<SocketAddr, TransportError> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()),
            None => Err(TransportError::Stopped { addr: self.addr }),
        }
    }
}

impl Drop for TcpListeningHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_accept_loop(
    listener: Arc<Listener>,
    handler: Arc<dyn ConnectionHandler>,
    acceptor: usize,
) {
    tracing::debug!(address = %listener.local_addr(), acceptor, "Acceptor running");
    loop {
        match listener.accept().await {
            Ok(connection) => handler.handle(connection),
            Err(e) => {
                tracing::warn!(
                    address = %listener.local_addr(),
                    acceptor,
                    error = %e,
                    "Failed to accept connection"
                );
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
