//! Grid Error Types
//!
//! Error handling for connectors, sessions, correlation and codec failures.

use crate::message::RemoteFailure;
use std::net::SocketAddr;
use thiserror::Error;

/// Main grid network error type
#[derive(Error, Debug)]
pub enum GridError {
    /// Connector errors: unreachable address, connect timeout, no connector for scheme
    #[error("Connector error for {address}: {message}")]
    Connector {
        address: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Session level errors on an established connection
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Framing and serialization errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request/reply correlation errors
    #[error("Correlation error for request {request_id}: {message}")]
    Correlation { request_id: u64, message: String },

    /// Failure carried back in a reply body
    #[error("Remote failure: {0}")]
    Remote(RemoteFailure),

    /// Configuration and address parsing errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Operation exceeded its deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Operation requires a connected node connector
    #[error("Connector '{connector}' is not connected")]
    NotConnected { connector: String },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for grid network operations
pub type Result<T> = std::result::Result<T, GridError>;

impl GridError {
    /// Create a connector error for the given target address
    pub fn connector(address: impl ToString, message: impl Into<String>) -> Self {
        Self::Connector {
            address: address.to_string(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connector error wrapping its root cause
    pub fn connector_with_source(
        address: impl ToString,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connector {
            address: address.to_string(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a correlation error
    pub fn correlation(request_id: u64, message: impl Into<String>) -> Self {
        Self::Correlation {
            request_id,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a not-connected error
    pub fn not_connected(connector: impl Into<String>) -> Self {
        Self::NotConnected {
            connector: connector.into(),
        }
    }

    /// The failure carried by a reply, if this error came from the remote side
    pub fn remote_failure(&self) -> Option<&RemoteFailure> {
        match self {
            GridError::Remote(failure) => Some(failure),
            _ => None,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            GridError::Connector { .. } => true,
            GridError::Connection { .. } => true,
            GridError::Timeout { .. } => true,
            GridError::Io { .. } => true,
            GridError::NotConnected { .. } => true,
            GridError::Protocol { .. } => false,
            GridError::Correlation { .. } => false,
            GridError::Remote(_) => false,
            GridError::Configuration { .. } => false,
        }
    }

    /// Get error category for logs and stats
    pub fn category(&self) -> &'static str {
        match self {
            GridError::Connector { .. } => "connector",
            GridError::Connection { .. } => "connection",
            GridError::Protocol { .. } => "protocol",
            GridError::Correlation { .. } => "correlation",
            GridError::Remote(_) => "remote",
            GridError::Configuration { .. } => "configuration",
            GridError::Timeout { .. } => "timeout",
            GridError::NotConnected { .. } => "not_connected",
            GridError::Io { .. } => "io",
        }
    }
}

/// Convert standard I/O errors to grid errors
impl From<std::io::Error> for GridError {
    fn from(error: std::io::Error) -> Self {
        GridError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

/// Convert bincode errors to grid errors
impl From<bincode::Error> for GridError {
    fn from(error: bincode::Error) -> Self {
        GridError::protocol_with_source("Binary serialization failed", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_connector_error_names_address() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = GridError::connector_with_source("Mina:node1:10.0.0.7:9123", "connect failed", io);

        assert_eq!(err.category(), "connector");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Mina:node1:10.0.0.7:9123"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connection_error() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 8080);
        let err = GridError::connection("Session closed", Some(addr));

        match err {
            GridError::Connection { remote_addr, .. } => {
                assert_eq!(remote_addr, Some(addr));
            }
            _ => panic!("Expected Connection error"),
        }
    }

    #[test]
    fn test_remote_failure_is_not_retryable() {
        let err = GridError::Remote(RemoteFailure::new("unknown_command", "Foo.bar"));
        assert_eq!(err.category(), "remote");
        assert!(!err.is_retryable());
        assert_eq!(err.remote_failure().map(|f| f.kind.as_str()), Some("unknown_command"));
    }

    #[test]
    fn test_error_categorization() {
        assert_eq!(GridError::protocol("test").category(), "protocol");
        assert_eq!(GridError::timeout("request", 5000).category(), "timeout");
        assert_eq!(GridError::correlation(7, "dup").category(), "correlation");
        assert!(!GridError::configuration("bad", None).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        match GridError::from(io_err) {
            GridError::Io { message, .. } => assert!(message.contains("reset")),
            _ => panic!("Expected Io error"),
        }
    }
}
