/// Unified error handling for the Redis Cluster topology/routing core
///
/// Mirrors the shape of a Pingora-style proxy's error module: one top-level
/// enum per concern, `#[from]` conversions at the seams, severity/
/// recoverability helpers for the logging layer to key off.
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for cluster topology and routing operations
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Network-related errors (connect, read, write)
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Topology-fetch failure: connection refused, IO error, protocol error,
    /// or a parse error anywhere in `fetch_cluster_configuration`
    #[error("topology fetch failed against {address}: {message}")]
    TopologyFetch { address: String, message: String },

    /// A single "CLUSTER NODES" record was malformed (missing flags or address)
    #[error("malformed topology record: {0}")]
    MalformedRecord(#[from] ParseError),

    /// Authentication failure against a node
    #[error("auth failed against {address}: {message}")]
    Auth { address: String, message: String },

    /// Duplication facility failure: a source node name had no copy
    #[error("duplication failed: source node {0:?} has no copy")]
    DuplicationMissingNode(String),

    /// Cluster is broken and refuses further work
    #[error("cluster is broken, refusing further work")]
    Broken,
}

/// Errors parsing a "CLUSTER NODES" text record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("record missing flags field")]
    MissingFlags,
    #[error("record missing address field")]
    MissingAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid slot specifier: {0}")]
    InvalidSlotSpecifier(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("serialize error: {0}")]
    SerializeError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

impl ClusterError {
    pub fn topology_fetch<S: Into<String>>(address: S, message: S) -> Self {
        ClusterError::TopologyFetch {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn auth<S: Into<String>>(address: S, message: S) -> Self {
        ClusterError::Auth {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Whether a caller might reasonably retry this operation later
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClusterError::Network(_) => true,
            ClusterError::TopologyFetch { .. } => true,
            ClusterError::Auth { .. } => true,
            _ => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ClusterError::Config(_) => ErrorSeverity::Critical,
            ClusterError::Broken => ErrorSeverity::Critical,
            ClusterError::Network(_) => ErrorSeverity::Warning,
            ClusterError::Auth { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ClusterError::auth("127.0.0.1:7000", "bad secret");
        assert!(matches!(error, ClusterError::Auth { .. }));
        assert_eq!(
            error.to_string(),
            "auth failed against 127.0.0.1:7000: bad secret"
        );
    }

    #[test]
    fn test_error_severity() {
        let config_error =
            ClusterError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let network_error =
            ClusterError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert_eq!(network_error.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_error_recoverability() {
        let network_error =
            ClusterError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert!(network_error.is_recoverable());

        let broken = ClusterError::Broken;
        assert!(!broken.is_recoverable());
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse_error = ParseError::MissingFlags;
        let cluster_error: ClusterError = parse_error.into();
        assert!(matches!(cluster_error, ClusterError::MalformedRecord(_)));
    }
}
