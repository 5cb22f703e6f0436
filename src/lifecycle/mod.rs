//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server (server.rs, state.rs):
//!     init (resolve addresses) → bind (create handles) → start (accept)
//!     shutdown: stop handles → unregister services
//!
//! Process (signals.rs, shutdown.rs):
//!     SIGTERM/SIGINT → broadcast to connection tasks → server shutdown
//! ```
//!
//! # Design Decisions
//! - States only move forward; out-of-order calls panic
//! - Shutdown is idempotent and safe from any state

pub mod server;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use server::{RpcServer, ServerError};
pub use shutdown::Shutdown;
pub use state::ServerState;
