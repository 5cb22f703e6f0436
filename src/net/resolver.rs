//! Role-aware address resolution.
//!
//! # Responsibilities
//! - Turn configured address lists into [`ResolvedAddress`] values
//! - Apply the per-role port policy
//! - Parse proxy-advertised endpoints as plain metadata
//!
//! # Port policy
//! ```text
//! role             port < 1024   port == 0
//! Bind             warn          fatal unless allow_ephemeral
//! Proxied          warn          fatal unless allow_ephemeral
//! Advertised       -             always fatal
//! ProxyAdvertised  -             - (never bound)
//! ```
//!
//! Peers cache bind ports across restarts. An ephemeral port the role does
//! not permit is a [`PolicyViolation`]: logged, then the process aborts.
//! Everything else is a recoverable [`AddressError`].

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::net::address::{AddressError, AddressRole, HostPort, ResolvedAddress};

/// Ports below this value usually need elevated privileges to bind.
const FIRST_UNPRIVILEGED_PORT: u16 = 1024;

/// An irrecoverable misconfiguration. Never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("binding to ephemeral ports not supported (RPC {role} address configured to {addr})")]
    EphemeralListener { role: AddressRole, addr: SocketAddr },
    #[error("advertising an ephemeral port is not supported (RPC advertised address configured to {addr})")]
    EphemeralAdvertised { addr: SocketAddr },
}

/// Log the violation and terminate.
///
/// Release and dev builds use `panic = "abort"`, so this ends the process.
pub fn abort_on_violation(violation: PolicyViolation) -> ! {
    tracing::error!(violation = %violation, "fatal RPC address configuration");
    panic!("{violation}");
}

/// Whether binding `port` typically requires elevated privileges.
pub fn is_privileged_port(port: u16) -> bool {
    port != 0 && port < FIRST_UNPRIVILEGED_PORT
}

/// Resolve a comma-separated list for a socket-bearing role.
///
/// Produces one address per non-empty token, in input order. A list with no
/// tokens is an error. `allow_ephemeral` only affects the bind and proxied
/// roles.
///
/// # Panics
/// Aborts on an ephemeral port the role does not permit, and when called
/// with [`AddressRole::ProxyAdvertised`], which is never resolved.
pub fn resolve(
    role: AddressRole,
    list: &str,
    default_port: u16,
    allow_ephemeral: bool,
) -> Result<Vec<ResolvedAddress>, AddressError> {
    assert!(
        role.is_socket_role(),
        "{role} addresses are metadata and are never resolved"
    );

    let host_ports = HostPort::parse_list(list, default_port)?;
    if host_ports.is_empty() {
        return Err(AddressError::Empty { role });
    }

    let mut seen = HashSet::with_capacity(host_ports.len());
    let mut resolved = Vec::with_capacity(host_ports.len());
    for host_port in &host_ports {
        let addr = host_port.resolve()?;
        if !seen.insert(addr) {
            tracing::info!(
                role = %role,
                address = %addr,
                host_port = %host_port,
                "address duplicates an earlier entry"
            );
        }
        resolved.push(ResolvedAddress::new(role, addr));
    }

    check_ports(role, &resolved, allow_ephemeral);
    Ok(resolved)
}

fn check_ports(role: AddressRole, addrs: &[ResolvedAddress], allow_ephemeral: bool) {
    for resolved in addrs {
        let addr = resolved.addr();
        match role {
            AddressRole::Bind | AddressRole::Proxied => {
                if is_privileged_port(addr.port()) {
                    tracing::warn!(
                        role = %role,
                        address = %addr,
                        "may be unable to bind to privileged port"
                    );
                }
                if addr.port() == 0 && !allow_ephemeral {
                    abort_on_violation(PolicyViolation::EphemeralListener { role, addr });
                }
            }
            AddressRole::Advertised => {
                if addr.port() == 0 {
                    abort_on_violation(PolicyViolation::EphemeralAdvertised { addr });
                }
            }
            AddressRole::ProxyAdvertised => {}
        }
    }
}

/// Parse proxy-advertised endpoints without resolving them.
///
/// An empty input yields an empty list. A non-empty input must contain at
/// least one token.
pub fn parse_proxy_advertised(list: &str, default_port: u16) -> Result<Vec<HostPort>, AddressError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    let host_ports = HostPort::parse_list(list, default_port)?;
    if host_ports.is_empty() {
        return Err(AddressError::Empty {
            role: AddressRole::ProxyAdvertised,
        });
    }
    Ok(host_ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(addrs: &[ResolvedAddress]) -> Vec<u16> {
        addrs.iter().map(ResolvedAddress::port).collect()
    }

    #[test]
    fn one_address_per_token_in_order() {
        let addrs = resolve(
            AddressRole::Bind,
            "127.0.0.3:7003, 127.0.0.1:7001,127.0.0.2",
            7050,
            false,
        )
        .unwrap();
        let rendered: Vec<String> = addrs.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["127.0.0.3:7003", "127.0.0.1:7001", "127.0.0.2:7050"]
        );
        assert!(addrs.iter().all(|a| a.role() == AddressRole::Bind));
    }

    #[test]
    fn duplicate_tokens_are_kept() {
        let addrs = resolve(AddressRole::Bind, "127.0.0.1:7001,127.0.0.1:7001", 0, false).unwrap();
        assert_eq!(ports(&addrs), vec![7001, 7001]);
    }

    #[test]
    fn empty_list_is_recoverable_error() {
        let err = resolve(AddressRole::Bind, " , ", 0, false).unwrap_err();
        assert!(matches!(
            err,
            AddressError::Empty {
                role: AddressRole::Bind
            }
        ));
    }

    #[test]
    fn malformed_token_is_recoverable_error() {
        let err = resolve(AddressRole::Proxied, "127.0.0.1:port", 0, true).unwrap_err();
        assert!(matches!(err, AddressError::InvalidPort { .. }));
    }

    #[test]
    fn privileged_port_is_only_a_warning() {
        let addrs = resolve(AddressRole::Bind, "127.0.0.1:80", 0, false).unwrap();
        assert_eq!(ports(&addrs), vec![80]);
        assert!(is_privileged_port(80));
        assert!(!is_privileged_port(0));
        assert!(!is_privileged_port(1024));
    }

    #[test]
    fn ephemeral_bind_allowed_with_override() {
        let addrs = resolve(AddressRole::Bind, "127.0.0.1:0", 0, true).unwrap();
        assert_eq!(ports(&addrs), vec![0]);
    }

    #[test]
    fn ephemeral_proxied_allowed_with_override() {
        let addrs = resolve(AddressRole::Proxied, "127.0.0.1", 0, true).unwrap();
        assert_eq!(ports(&addrs), vec![0]);
    }

    // Aborting is the intended outcome here, not a recoverable error.
    #[test]
    #[should_panic(expected = "binding to ephemeral ports not supported")]
    fn ephemeral_bind_without_override_aborts() {
        let _ = resolve(AddressRole::Bind, "127.0.0.1:0", 0, false);
    }

    #[test]
    #[should_panic(expected = "binding to ephemeral ports not supported")]
    fn ephemeral_proxied_without_override_aborts() {
        let _ = resolve(AddressRole::Proxied, "127.0.0.1:0", 0, false);
    }

    #[test]
    #[should_panic(expected = "advertising an ephemeral port is not supported")]
    fn ephemeral_advertised_aborts_even_with_override() {
        let _ = resolve(AddressRole::Advertised, "127.0.0.1:0", 0, true);
    }

    #[test]
    #[should_panic(expected = "never resolved")]
    fn proxy_advertised_cannot_be_resolved() {
        let _ = resolve(AddressRole::ProxyAdvertised, "proxy.example:6000", 0, true);
    }

    #[test]
    fn proxy_advertised_is_metadata_only() {
        let hps = parse_proxy_advertised("proxy.example:6000, other.invalid", 7050).unwrap();
        assert_eq!(
            hps,
            vec![
                HostPort::new("proxy.example", 6000),
                HostPort::new("other.invalid", 7050)
            ]
        );
    }

    #[test]
    fn proxy_advertised_empty_input_is_empty_list() {
        assert!(parse_proxy_advertised("", 0).unwrap().is_empty());
        assert!(parse_proxy_advertised("   ", 0).unwrap().is_empty());
    }

    #[test]
    fn proxy_advertised_without_tokens_is_error() {
        let err = parse_proxy_advertised(",", 0).unwrap_err();
        assert!(matches!(
            err,
            AddressError::Empty {
                role: AddressRole::ProxyAdvertised
            }
        ));
    }
}
