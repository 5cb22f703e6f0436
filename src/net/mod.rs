//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address lists
//!     → address.rs (host:port parsing, DNS)
//!     → resolver.rs (per-role resolution, port policy)
//!     → transport.rs (Transport / ListeningHandle seam)
//!     → listener.rs (socket bind, accept loops, connection limits)
//!     → connection.rs (per-address connection tracking)
//! ```
//!
//! # Design Decisions
//! - The lifecycle controller only sees the `Transport` traits, so tests can
//!   swap in fakes
//! - Port policy violations are fatal, everything else is a returned error

pub mod address;
pub mod connection;
pub mod listener;
pub mod resolver;
pub mod transport;

pub use address::{AddressError, AddressRole, HostPort, ResolvedAddress};
pub use listener::{AcceptedConnection, ConnectionHandler, TcpTransport};
pub use resolver::PolicyViolation;
pub use transport::{ListeningHandle, Transport, TransportError};
