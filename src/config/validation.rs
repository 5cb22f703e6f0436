//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Cross-field rules between address lists
//! - Validate value ranges (acceptor and worker counts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is handed to the RPC server

use thiserror::Error;

use crate::config::schema::{ObservabilityConfig, RpcOptions, ServerConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxy_advertised_addresses and proxied_addresses should be either both set or both unset")]
    ProxyAddressMismatch,
    #[error("{field} must be at least 1")]
    ZeroCount { field: &'static str },
    #[error("unknown log format '{0}' (expected 'compact' or 'json')")]
    UnknownLogFormat(String),
}

/// Validate the whole configuration tree.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_rpc(&config.rpc, &mut errors);
    check_observability(&config.observability, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rpc(opts: &RpcOptions, errors: &mut Vec<ValidationError>) {
    let proxied = !opts.proxied_addresses.trim().is_empty();
    let proxy_advertised = !opts.proxy_advertised_addresses.trim().is_empty();
    if proxied != proxy_advertised {
        errors.push(ValidationError::ProxyAddressMismatch);
    }

    let counts = [
        ("acceptors_per_address", opts.acceptors_per_address),
        ("service_threads", opts.service_threads),
        ("max_connections_per_address", opts.max_connections_per_address),
    ];
    for (field, value) in counts {
        if value == 0 {
            errors.push(ValidationError::ZeroCount { field });
        }
    }
}

fn check_observability(config: &ObservabilityConfig, errors: &mut Vec<ValidationError>) {
    let format = config.log_format.to_ascii_lowercase();
    if format != "compact" && format != "json" {
        errors.push(ValidationError::UnknownLogFormat(config.log_format.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_rpc(rpc: RpcOptions) -> ServerConfig {
        ServerConfig {
            rpc,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn proxied_without_proxy_advertised_is_rejected() {
        let opts = RpcOptions {
            proxied_addresses: "127.0.0.1:0".into(),
            ..RpcOptions::default()
        };
        let errors = validate_config(&with_rpc(opts)).unwrap_err();
        assert_eq!(errors, vec![ValidationError::ProxyAddressMismatch]);
    }

    #[test]
    fn proxy_advertised_without_proxied_is_rejected() {
        let opts = RpcOptions {
            proxy_advertised_addresses: "proxy.example:6000".into(),
            ..RpcOptions::default()
        };
        assert!(validate_config(&with_rpc(opts)).is_err());
    }

    #[test]
    fn both_proxy_lists_set_is_accepted() {
        let opts = RpcOptions {
            proxied_addresses: "127.0.0.1:0".into(),
            proxy_advertised_addresses: "proxy.example:6000".into(),
            ..RpcOptions::default()
        };
        assert!(validate_config(&with_rpc(opts)).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.rpc.acceptors_per_address = 0;
        config.rpc.service_threads = 0;
        config.rpc.proxied_addresses = "127.0.0.1:7000".into();
        config.observability.log_format = "pretty".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroCount {
            field: "service_threads"
        }));
    }
}
