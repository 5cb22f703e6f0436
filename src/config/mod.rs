//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → RpcOptions handed to RpcServer, read once at Init
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no hot reload of address lists
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ObservabilityConfig, RpcOptions, ServerConfig};
pub use validation::{validate_config, ValidationError};
