//! Address roles and `host[:port]` parsing.
//!
//! # Responsibilities
//! - Name the four address roles a node reasons about
//! - Parse comma-separated address lists into [`HostPort`] tokens
//! - Resolve tokens into concrete socket addresses

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use thiserror::Error;

/// The role an address plays for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressRole {
    /// Sockets the process listens on. Peers cache these ports across restarts.
    Bind,
    /// Addresses told to clients.
    Advertised,
    /// Extra local listeners serving proxy-forwarded traffic.
    Proxied,
    /// External side of the proxy. Metadata only, never bound.
    ProxyAdvertised,
}

impl AddressRole {
    /// Whether addresses of this role are resolved into socket addresses.
    pub fn is_socket_role(self) -> bool {
        !matches!(self, AddressRole::ProxyAdvertised)
    }
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressRole::Bind => "bind",
            AddressRole::Advertised => "advertised",
            AddressRole::Proxied => "proxied",
            AddressRole::ProxyAdvertised => "proxy-advertised",
        };
        f.write_str(name)
    }
}

/// Errors produced while parsing or resolving address lists.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("no {role} address specified")]
    Empty { role: AddressRole },
    #[error("invalid port in address '{token}'")]
    InvalidPort { token: String },
    #[error("missing host in address '{token}'")]
    MissingHost { token: String },
    #[error("malformed address '{token}'")]
    Malformed { token: String },
    #[error("failed to resolve address {host_port}: {source}")]
    Resolve {
        host_port: HostPort,
        #[source]
        source: io::Error,
    },
    #[error("no socket addresses resolved for {host_port}")]
    NoAddresses { host_port: HostPort },
}

/// An unresolved `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Describe a concrete socket address as a host/port pair.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse one `host[:port]` token, substituting `default_port` when the
    /// port is omitted.
    ///
    /// IPv6 literals with a port must be bracketed (`[::1]:7051`); a bare
    /// IPv6 literal takes the default port.
    pub fn parse(token: &str, default_port: u16) -> Result<Self, AddressError> {
        let token = token.trim();
        let malformed = || AddressError::Malformed {
            token: token.to_string(),
        };

        let (host, port) = if let Some(rest) = token.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(malformed)?;
            let port = match tail {
                "" => None,
                _ => Some(tail.strip_prefix(':').ok_or_else(malformed)?),
            };
            (host, port)
        } else if token.parse::<Ipv6Addr>().is_ok() {
            (token, None)
        } else {
            match token.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => return Err(malformed()),
                Some((host, port)) => (host, Some(port)),
                None => (token, None),
            }
        };

        if host.is_empty() {
            return Err(AddressError::MissingHost {
                token: token.to_string(),
            });
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
                token: token.to_string(),
            })?,
            None => default_port,
        };
        Ok(Self::new(host, port))
    }

    /// Parse a comma-separated list. Empty tokens are skipped, order is kept.
    pub fn parse_list(list: &str, default_port: u16) -> Result<Vec<Self>, AddressError> {
        list.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Self::parse(token, default_port))
            .collect()
    }

    /// Resolve to a single socket address.
    ///
    /// IP literals never touch the resolver. Host names take the first
    /// address the system resolver returns.
    pub fn resolve(&self) -> Result<SocketAddr, AddressError> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let mut addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| AddressError::Resolve {
                host_port: self.clone(),
                source,
            })?;
        addrs.next().ok_or_else(|| AddressError::NoAddresses {
            host_port: self.clone(),
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A concrete socket address tagged with its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    role: AddressRole,
    addr: SocketAddr,
}

impl ResolvedAddress {
    pub fn new(role: AddressRole, addr: SocketAddr) -> Self {
        Self { role, addr }
    }

    pub fn role(&self) -> AddressRole {
        self.role
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.addr, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_and_port() {
        let hp = HostPort::parse("10.0.0.1:7051", 0).unwrap();
        assert_eq!(hp, HostPort::new("10.0.0.1", 7051));
    }

    #[test]
    fn parse_applies_default_port() {
        let hp = HostPort::parse(" node-1.example ", 7050).unwrap();
        assert_eq!(hp, HostPort::new("node-1.example", 7050));
    }

    #[test]
    fn parse_ipv6_forms() {
        assert_eq!(
            HostPort::parse("[::1]:9000", 0).unwrap(),
            HostPort::new("::1", 9000)
        );
        assert_eq!(HostPort::parse("[::1]", 42).unwrap(), HostPort::new("::1", 42));
        assert_eq!(HostPort::parse("fe80::1", 42).unwrap(), HostPort::new("fe80::1", 42));
        assert_eq!(HostPort::new("::1", 9000).to_string(), "[::1]:9000");
    }

    #[test]
    fn parse_rejects_bad_tokens() {
        assert!(matches!(
            HostPort::parse("host:notaport", 0),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            HostPort::parse("host:70000", 0),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            HostPort::parse(":7051", 0),
            Err(AddressError::MissingHost { .. })
        ));
        assert!(matches!(
            HostPort::parse("[::1", 0),
            Err(AddressError::Malformed { .. })
        ));
        assert!(matches!(
            HostPort::parse("a:b:c", 0),
            Err(AddressError::Malformed { .. })
        ));
    }

    #[test]
    fn parse_list_keeps_order_and_skips_empty_tokens() {
        let list = HostPort::parse_list(" 127.0.0.2:1 ,, 127.0.0.1:2,", 0).unwrap();
        assert_eq!(
            list,
            vec![HostPort::new("127.0.0.2", 1), HostPort::new("127.0.0.1", 2)]
        );
        assert!(HostPort::parse_list(" , ", 0).unwrap().is_empty());
    }

    #[test]
    fn resolve_ip_literal() {
        let addr = HostPort::new("127.0.0.1", 7051).resolve().unwrap();
        assert_eq!(addr, "127.0.0.1:7051".parse().unwrap());
    }

    #[test]
    fn resolve_localhost_keeps_port() {
        let addr = HostPort::new("localhost", 7051).resolve().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 7051);
    }

    #[test]
    fn role_classification() {
        assert!(AddressRole::Bind.is_socket_role());
        assert!(AddressRole::Advertised.is_socket_role());
        assert!(!AddressRole::ProxyAdvertised.is_socket_role());
        assert_eq!(AddressRole::ProxyAdvertised.to_string(), "proxy-advertised");
    }
}
