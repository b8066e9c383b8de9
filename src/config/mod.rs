/// Configuration management for the Redis Cluster topology/routing core
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a cluster-aware proxy process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration (listen address, connection limits)
    pub server: ServerConfig,
    /// Redis Cluster configuration
    pub cluster: ClusterConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Number of worker threads, one `Cluster` per worker
    pub worker_threads: Option<usize>,
}

/// Redis Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Seed nodes used for the initial topology fetch ("host:port")
    pub seed_nodes: Vec<String>,
    /// Pre-shared AUTH secret sent to every node before any other command
    pub auth_secret: Option<String>,
    /// Maximum number of MOVED/ASK redirects to follow per request
    pub max_redirects: u8,
    /// Connection timeout in milliseconds
    pub connection_timeout_ms: u64,
    /// TCP keepalive interval in seconds, applied to every node connection
    pub keepalive_interval_sec: u64,
    /// Background liveness-probe interval in seconds (0 disables the probe)
    pub probe_interval_sec: u64,
}

impl ClusterConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_sec)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
    /// Log to stdout
    pub stdout: bool,
    /// Log file path (optional)
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:6379".to_string(),
                max_connections: 10000,
                connection_timeout_sec: 60,
                worker_threads: None,
            },
            cluster: ClusterConfig {
                seed_nodes: vec!["127.0.0.1:7000".to_string()],
                auth_secret: None,
                max_redirects: 16,
                connection_timeout_ms: 5000,
                keepalive_interval_sec: 15,
                probe_interval_sec: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                stdout: true,
                file: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.server.connection_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connection_timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.cluster.seed_nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster.seed_nodes cannot be empty".to_string(),
            ));
        }

        for node in &self.cluster.seed_nodes {
            node.parse::<std::net::SocketAddr>().map_err(|_| {
                ConfigError::ValidationError(format!("invalid seed node: {}", node))
            })?;
        }

        if self.cluster.max_redirects == 0 {
            return Err(ConfigError::ValidationError(
                "cluster.max_redirects must be greater than 0".to_string(),
            ));
        }

        if self.cluster.connection_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "cluster.connection_timeout_ms must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            cluster: ClusterConfig {
                seed_nodes: vec![
                    "10.0.1.20:6379".to_string(),
                    "10.0.1.21:6379".to_string(),
                    "10.0.1.22:6379".to_string(),
                ],
                auth_secret: None,
                max_redirects: 16,
                connection_timeout_ms: 5000,
                keepalive_interval_sec: 15,
                probe_interval_sec: 5,
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        config.server.max_connections = 1000;
        assert!(config.validate().is_ok());

        config.cluster.seed_nodes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_seed_node_rejected() {
        let mut config = Config::default();
        config.cluster.seed_nodes = vec!["not-an-address".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed_config.validate().is_ok());
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert!(loaded_config.validate().is_ok());
    }
}
