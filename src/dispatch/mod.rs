//! Call dispatch: service registration and per-service worker pools.
//!
//! # Data Flow
//! ```text
//! transport (decoded call)
//!     → router.rs (service name lookup, open check)
//!     → pool.rs (bounded queue, reject when full)
//!     → worker thread → ServiceHandler::handle
//! ```

pub mod pool;
pub mod router;

pub use pool::{InboundCall, ServiceHandler, ServicePool};
pub use router::ServiceRouter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("service {service}: worker count must be at least 1")]
    InvalidWorkerCount { service: String },

    #[error("service {service}: failed to spawn worker thread: {source}")]
    SpawnWorker {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service {0} is already registered")]
    DuplicateService(String),

    #[error("no such service: {0}")]
    NoSuchService(String),

    #[error("service {service} is too busy (queue length {queue_length})")]
    TooBusy { service: String, queue_length: usize },

    #[error("services are not registered yet")]
    ServicesNotRegistered,

    #[error("service {service} is shutting down")]
    ShuttingDown { service: String },
}
