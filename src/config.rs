//! Configuration module for the shiftline server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.
//!
//! The resolved `Config` is built once at startup and never mutated;
//! every connection handler shares it read-only through an `Arc`.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::transform::{Transform, UnknownTransform};

/// Largest accepted `byte_limit`. Every connection allocates a buffer this size.
pub const MAX_BYTE_LIMIT: usize = 16 * 1024 * 1024;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "shiftline")]
#[command(author = "shiftline authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-delimited TCP server that encodes or decodes each message", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., 127.0.0.1:8080, or :8080 for all interfaces)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Transport to listen with (tcp, tcp4, tcp6)
    #[arg(short, long)]
    pub proto: Option<String>,

    /// Maximum message size in bytes, excluding the newline
    #[arg(short, long = "blimit")]
    pub byte_limit: Option<usize>,

    /// Buffer refills allowed while discarding an oversized message
    #[arg(short = 'd', long)]
    pub max_drain: Option<usize>,

    /// Encode or decode each message (encode, decode)
    #[arg(short, long)]
    pub transform: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Transport kind
    #[serde(default = "default_proto")]
    pub proto: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds to wait for open connections on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            proto: default_proto(),
            workers: None,
            max_connections: default_max_connections(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Message framing limits
#[derive(Debug, Deserialize)]
pub struct FramingConfig {
    /// Maximum message size in bytes, excluding the newline
    #[serde(default = "default_byte_limit")]
    pub byte_limit: usize,
    /// Buffer refills allowed while discarding an oversized message
    #[serde(default = "default_max_drain")]
    pub max_drain: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            byte_limit: default_byte_limit(),
            max_drain: default_max_drain(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_transform")]
    pub mode: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            mode: default_transform(),
        }
    }
}

/// Diagnostic queue configuration
#[derive(Debug, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_reporter_capacity")]
    pub capacity: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            capacity: default_reporter_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    ":8080".to_string()
}

fn default_proto() -> String {
    "tcp".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_byte_limit() -> usize {
    256
}

fn default_max_drain() -> usize {
    4
}

fn default_transform() -> String {
    "encode".to_string()
}

fn default_reporter_capacity() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Network family the listener is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// IPv4 or IPv6
    Tcp,
    Tcp4,
    Tcp6,
}

impl TransportKind {
    /// Whether `addr` belongs to this transport's address family.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            TransportKind::Tcp => true,
            TransportKind::Tcp4 => addr.is_ipv4(),
            TransportKind::Tcp6 => addr.is_ipv6(),
        }
    }

    /// Host used when the listen address names only a port.
    fn any_host(&self) -> &'static str {
        match self {
            TransportKind::Tcp | TransportKind::Tcp4 => "0.0.0.0",
            TransportKind::Tcp6 => "[::]",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tcp4 => "tcp4",
            TransportKind::Tcp6 => "tcp6",
        })
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(TransportKind::Tcp),
            "tcp4" => Ok(TransportKind::Tcp4),
            "tcp6" => Ok(TransportKind::Tcp6),
            other => Err(ConfigError::UnknownTransport(other.to_string())),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub transport: TransportKind,
    pub byte_limit: usize,
    pub max_drain: usize,
    pub transform: Transform,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub shutdown_grace: Duration,
    pub reporter_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            transport: TransportKind::Tcp,
            byte_limit: default_byte_limit(),
            max_drain: default_max_drain(),
            transform: Transform::Encode,
            workers: None,
            max_connections: default_max_connections(),
            shutdown_grace: Duration::from_secs(default_shutdown_grace_secs()),
            reporter_capacity: default_reporter_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let transform = cli
            .transform
            .unwrap_or(toml_config.transform.mode)
            .parse::<Transform>()?;
        let transport = cli
            .proto
            .unwrap_or(toml_config.server.proto)
            .parse::<TransportKind>()?;

        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            transport,
            byte_limit: cli.byte_limit.unwrap_or(toml_config.framing.byte_limit),
            max_drain: cli.max_drain.unwrap_or(toml_config.framing.max_drain),
            transform,
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            shutdown_grace: Duration::from_secs(toml_config.server.shutdown_grace_secs),
            reporter_capacity: toml_config.reporter.capacity,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.byte_limit == 0 {
            return Err(ConfigError::Invalid("byte_limit must be greater than 0"));
        }
        if self.byte_limit > MAX_BYTE_LIMIT {
            return Err(ConfigError::Invalid("byte_limit must be at most 16 MiB"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be greater than 0"));
        }
        if self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid("max_connections is too large"));
        }
        if self.reporter_capacity == 0 {
            return Err(ConfigError::Invalid("reporter capacity must be greater than 0"));
        }
        if self.reporter_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid("reporter capacity is too large"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be greater than 0"));
        }
        Ok(())
    }

    /// Listen address with a host filled in for port-only forms like `:8080`.
    pub fn listen_addr(&self) -> String {
        if self.listen.starts_with(':') {
            format!("{}{}", self.transport.any_host(), self.listen)
        } else {
            self.listen.clone()
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    UnknownTransform(#[from] UnknownTransform),

    #[error("invalid transport provided: {0} (expected: tcp, tcp4, tcp6)")]
    UnknownTransport(String),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["shiftline"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, ":8080");
        assert_eq!(config.server.proto, "tcp");
        assert_eq!(config.framing.byte_limit, 256);
        assert_eq!(config.framing.max_drain, 4);
        assert_eq!(config.transform.mode, "encode");
        assert_eq!(config.reporter.capacity, 10);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            proto = "tcp4"
            workers = 4
            max_connections = 64
            shutdown_grace_secs = 2

            [framing]
            byte_limit = 512
            max_drain = 8

            [transform]
            mode = "decode"

            [reporter]
            capacity = 32

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.proto, "tcp4");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.shutdown_grace_secs, 2);
        assert_eq!(config.framing.byte_limit, 512);
        assert_eq!(config.framing.max_drain, 8);
        assert_eq!(config.transform.mode, "decode");
        assert_eq!(config.reporter.capacity, 32);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_merge_defaults() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, ":8080");
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.byte_limit, 256);
        assert_eq!(config.transform, Transform::Encode);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [framing]
            byte_limit = 512
            [transform]
            mode = "encode"
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["--blimit", "16", "-t", "decode", "--log-level", "trace"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.byte_limit, 16);
        assert_eq!(config.transform, Transform::Decode);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_unknown_transform_is_config_error() {
        let err = Config::merge(cli(&["--transform", "rot13"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTransform(_)));
        assert!(err.to_string().contains("rot13"));
    }

    #[test]
    fn test_unknown_transport_is_config_error() {
        let err = Config::merge(cli(&["--proto", "udp"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTransport(ref p) if p == "udp"));
    }

    #[test]
    fn test_zero_byte_limit_rejected() {
        let err = Config::merge(cli(&["--blimit", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_byte_limit_upper_bound() {
        let config = Config {
            byte_limit: MAX_BYTE_LIMIT,
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        for byte_limit in [MAX_BYTE_LIMIT + 1, 1 << 40, usize::MAX] {
            let config = Config {
                byte_limit,
                ..Config::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_max_connections_upper_bound() {
        let config = Config {
            max_connections: Semaphore::MAX_PERMITS,
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            max_connections: usize::MAX,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reporter_capacity_upper_bound() {
        let config = Config {
            reporter_capacity: usize::MAX,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_byte_limit_flag_rejected() {
        let err = Config::merge(cli(&["--blimit", "1099511627776"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_drain_allowed() {
        let config = Config::merge(cli(&["--max-drain", "0"]), TomlConfig::default()).unwrap();
        assert_eq!(config.max_drain, 0);
    }

    #[test]
    fn test_port_only_listen_addr() {
        let mut config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");

        config.transport = TransportKind::Tcp6;
        assert_eq!(config.listen_addr(), "[::]:8080");

        config.listen = "127.0.0.1:9000".to_string();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_transport_accepts_family() {
        let v4: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let v6: SocketAddr = "[::1]:1".parse().unwrap();
        assert!(TransportKind::Tcp.accepts(&v4));
        assert!(TransportKind::Tcp.accepts(&v6));
        assert!(TransportKind::Tcp4.accepts(&v4));
        assert!(!TransportKind::Tcp4.accepts(&v6));
        assert!(TransportKind::Tcp6.accepts(&v6));
        assert!(!TransportKind::Tcp6.accepts(&v4));
    }
}
