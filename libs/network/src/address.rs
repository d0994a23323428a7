//! Connector addresses
//!
//! Addresses have the form `<scheme>:<node-name>[:<host>[:<port>]]`, e.g.
//! `Mina:node1:127.0.0.1:9123` for a socket node or `Local:node1` for an
//! in-process one. The scheme selects the connector; it also decides the
//! [`ConnectorType`] that selection strategies rank candidates by.

use crate::error::{GridError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How far away the resource behind a connector lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorType {
    /// Same process
    Local,
    /// Cluster-managed resource
    Distributed,
    /// Reached over a socket
    Remote,
}

/// Parsed connector address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorAddress {
    pub scheme: String,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ConnectorAddress {
    /// Socket address using the default remote scheme
    pub fn remote(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: grid_config::service::transport::REMOTE_SCHEME.to_string(),
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// In-process address
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            scheme: "Local".to_string(),
            name: name.into(),
            host: None,
            port: None,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(':').collect();
        let scheme = parts[0].trim();
        if scheme.is_empty() {
            return Err(GridError::configuration(
                format!("Connector address '{}' has no scheme", value),
                Some("scheme"),
            ));
        }

        let port = match parts.get(3) {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                GridError::configuration(
                    format!("Connector address '{}' has an invalid port", value),
                    Some("port"),
                )
            })?),
            None => None,
        };

        if parts.len() > 4 {
            return Err(GridError::configuration(
                format!("Connector address '{}' has too many segments", value),
                None,
            ));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            name: parts.get(1).map(|s| s.to_string()).unwrap_or_default(),
            host: parts.get(2).map(|s| s.to_string()),
            port,
        })
    }

    /// Connector type implied by the scheme
    pub fn connector_type(&self) -> ConnectorType {
        match self.scheme.to_ascii_lowercase().as_str() {
            "local" => ConnectorType::Local,
            "distributed" => ConnectorType::Distributed,
            _ => ConnectorType::Remote,
        }
    }

    /// `host:port` for socket connectors
    pub fn socket_target(&self) -> Result<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Ok(format!("{}:{}", host, port)),
            _ => Err(GridError::connector(self, "address has no host and port")),
        }
    }
}

impl fmt::Display for ConnectorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.name)?;
        if let Some(host) = &self.host {
            write!(f, ":{}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

impl FromStr for ConnectorAddress {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_address() {
        let addr: ConnectorAddress = "Mina:node1:127.0.0.1:9123".parse().unwrap();
        assert_eq!(addr.scheme, "Mina");
        assert_eq!(addr.name, "node1");
        assert_eq!(addr.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(addr.port, Some(9123));
        assert_eq!(addr.connector_type(), ConnectorType::Remote);
        assert_eq!(addr.socket_target().unwrap(), "127.0.0.1:9123");
        assert_eq!(addr.to_string(), "Mina:node1:127.0.0.1:9123");
    }

    #[test]
    fn test_parse_local_and_distributed() {
        let local = ConnectorAddress::parse("Local:exec").unwrap();
        assert_eq!(local, ConnectorAddress::local("exec"));
        assert_eq!(local.connector_type(), ConnectorType::Local);
        assert!(local.socket_target().is_err());

        let dist = ConnectorAddress::parse("Distributed:behavior:id-7").unwrap();
        assert_eq!(dist.connector_type(), ConnectorType::Distributed);
        assert_eq!(dist.host.as_deref(), Some("id-7"));
        assert_eq!(dist.to_string(), "Distributed:behavior:id-7");
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConnectorAddress::parse("").is_err());
        assert!(ConnectorAddress::parse("Mina:n:host:notaport").is_err());
        assert!(ConnectorAddress::parse("Mina:n:host:1:extra").is_err());
    }
}
