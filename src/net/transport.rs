//! Transport capability interfaces.
//!
//! The RPC server only needs four things from a transport: create a listener
//! for an address, start its accept tasks, stop it, and report the address it
//! actually bound. Keeping that behind traits lets the lifecycle controller
//! run against in-memory fakes.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to create or configure the socket.
    #[error("failed to create socket for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Failed to read back the bound address.
    #[error("unable to get bound address: {source}")]
    LocalAddr {
        #[source]
        source: io::Error,
    },
    /// Accept tasks could not be started.
    #[error("failed to start accepting on {addr}: {reason}")]
    Start { addr: SocketAddr, reason: String },
    /// The handle was already stopped and its socket closed.
    #[error("listener for {addr} has been stopped")]
    Stopped { addr: SocketAddr },
}

/// Produces listening handles bound to OS ports.
pub trait Transport: Send + Sync {
    /// Bind a listening socket for `addr`. Accepting does not begin until
    /// [`ListeningHandle::start`].
    fn create_listening_handle(
        &self,
        addr: SocketAddr,
    ) -> Result<Box<dyn ListeningHandle>, TransportError>;
}

/// A bound accept endpoint.
pub trait ListeningHandle: Send {
    /// Start `acceptors` accept tasks. A second call on a running handle is a
    /// no-op.
    fn start(&mut self, acceptors: usize) -> Result<(), TransportError>;

    /// Stop accepting and close the socket. Idempotent and non-blocking.
    fn stop(&mut self);

    /// The concrete address the socket is bound to.
    fn bound_address(&self) -> Result<SocketAddr, TransportError>;
}
