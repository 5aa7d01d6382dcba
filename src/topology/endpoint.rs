//! Validated `host:port` addresses.

use std::fmt;
use std::str::FromStr;

use crate::client::types::ParseError;

/// Default Valkey cluster bus port offset.
pub const CLUSTER_BUS_PORT_OFFSET: u16 = 10000;

/// A network endpoint (host and port).
///
/// IPv6 hosts are written bracketed (`[::1]:7000`); [`Endpoint::host`] returns
/// them without brackets.
///
/// # Examples
///
/// ```
/// use valkey_topology::topology::Endpoint;
///
/// let endpoint = Endpoint::parse("10.0.0.5:6379").unwrap();
/// assert_eq!(endpoint.host(), "10.0.0.5");
/// assert_eq!(endpoint.port(), 6379);
/// assert_eq!(endpoint.to_string(), "10.0.0.5:6379");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from parts already known to be valid, such as a
    /// host and port reported by `CLUSTER NODES`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an address like `10.0.0.5:6379`, `[::1]:6379` or `10.0.0.5:6379@16379`.
    pub fn parse(address: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidAddress(address.to_string());

        let trimmed = address.split('@').next().unwrap_or(address);
        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            trimmed.rsplit_once(':').ok_or_else(invalid)?
        };

        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        // unbracketed IPv6 is ambiguous
        if !trimmed.starts_with('[') && host.contains(':') {
            return Err(invalid());
        }

        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Get the host, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the cluster bus port (client port + 10000).
    pub fn cluster_bus_port(&self) -> u16 {
        self.port.saturating_add(CLUSTER_BUS_PORT_OFFSET)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
