//! RPC server endpoint lifecycle.
//!
//! Resolves the node's bind, advertised, proxied, and proxy-advertised
//! address lists, creates listening sockets through a pluggable transport,
//! and attaches request-handling services to a shared router with
//! backpressure.

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{RpcOptions, ServerConfig};
pub use dispatch::{InboundCall, ServiceHandler, ServiceRouter};
pub use lifecycle::{RpcServer, ServerError, ServerState, Shutdown};
pub use net::{TcpTransport, Transport};
