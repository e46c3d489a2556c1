//! Configuration module for packet-log-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Smallest accepted listen backlog.
pub const MIN_BACKLOG: i32 = 10;

/// Command-line arguments for the packet log server
#[derive(Parser, Debug)]
#[command(name = "packet-log-server")]
#[command(author = "packet-log-server authors")]
#[command(version = "0.1.0")]
#[command(about = "Appends newline-delimited packets to a log and echoes the log back", long_about = None)]
pub struct CliArgs {
    /// Run in the background as a daemon
    #[arg(short, long)]
    pub daemon: bool,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on (all interfaces)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path of the packet log file
    #[arg(short = 'f', long)]
    pub data_file: Option<PathBuf>,

    /// Write the server pid to this file
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Where operational logs go
    #[arg(long, value_enum)]
    pub log_target: Option<LogTarget>,
}

/// Destination for operational logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// The system log (`syslog(3)`).
    Syslog,
    /// Standard error.
    Stderr,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port to bind on the wildcard address
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pending connection backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Run as a daemon
    #[serde(default)]
    pub daemon: bool,
    /// Pid file written after startup
    pub pid_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backlog: default_backlog(),
            daemon: false,
            pid_file: None,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Packet log location
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Largest packet a client may send, terminator included
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log destination
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            target: default_log_target(),
        }
    }
}

fn default_port() -> u16 {
    9000
}

fn default_backlog() -> i32 {
    MIN_BACKLOG
}

fn default_data_file() -> PathBuf {
    PathBuf::from("/var/tmp/aesdsocketdata")
}

fn default_max_packet_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_target() -> LogTarget {
    LogTarget::Syslog
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backlog: i32,
    pub daemon: bool,
    pub pid_file: Option<PathBuf>,
    pub data_file: PathBuf,
    pub max_packet_size: usize,
    pub log_level: String,
    pub log_target: LogTarget,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            daemon: cli.daemon || toml_config.server.daemon,
            pid_file: cli
                .pid_file
                .or(toml_config.server.pid_file)
                .map(absolute)
                .transpose()?,
            data_file: absolute(cli.data_file.unwrap_or(toml_config.storage.data_file))?,
            max_packet_size: toml_config.storage.max_packet_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            log_target: cli.log_target.unwrap_or(toml_config.logging.target),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog < MIN_BACKLOG {
            return Err(ConfigError::Invalid(format!(
                "backlog must be at least {MIN_BACKLOG}, got {}",
                self.backlog
            )));
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::Invalid(
                "max_packet_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Anchor a relative path at the launch directory, so it still names the
/// same file after daemon mode changes directory to `/`.
fn absolute(path: PathBuf) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|e| ConfigError::Path(path, e))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Path(PathBuf, std::io::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Path(path, e) => {
                write!(f, "Failed to resolve path '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
