//! Configuration for the chat server and client.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::Name;
use crate::server::MAX_SESSIONS;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "select-chat")]
#[command(author = "select-chat authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded chat server and client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server
    Serve {
        /// Address to bind to (e.g., 127.0.0.1:5555)
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Maximum number of concurrent sessions
        #[arg(short = 'm', long)]
        max_sessions: Option<usize>,

        /// Don't read admin commands from stdin
        #[arg(long)]
        no_console: bool,
    },
    /// Connect to a chat server
    Connect {
        /// Server address (e.g., 127.0.0.1:5555)
        #[arg(short, long)]
        server: Option<String>,

        /// Display name, at most 15 bytes
        name: String,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Server to connect to
    #[serde(default = "default_server")]
    pub server: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Longest wait for readiness, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
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
    "127.0.0.1:5555".to_string()
}

fn default_server() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_max_sessions() -> usize {
    10
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved server settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub max_sessions: usize,
    /// Read admin commands from stdin
    pub console: bool,
}

/// Resolved client settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Server address, resolved at connect time
    pub server: String,
    pub name: Name,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Server(ServerSettings),
    Client(ClientSettings),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub poll_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mode = match cli.command {
            Command::Serve {
                listen,
                max_sessions,
                no_console,
            } => {
                let listen = listen.unwrap_or(toml_config.server.listen);
                let listen = listen
                    .parse::<SocketAddr>()
                    .map_err(|_| ConfigError::Invalid(format!("invalid listen address '{}'", listen)))?;

                let max_sessions = max_sessions.unwrap_or(toml_config.server.max_sessions);
                if max_sessions == 0 || max_sessions > MAX_SESSIONS {
                    return Err(ConfigError::Invalid(format!(
                        "max_sessions must be between 1 and {}, got {}",
                        MAX_SESSIONS, max_sessions
                    )));
                }

                Mode::Server(ServerSettings {
                    listen,
                    max_sessions,
                    console: !no_console,
                })
            }
            Command::Connect { server, name } => {
                let name = Name::name(&name)
                    .map_err(|_| ConfigError::Invalid(format!("name '{}' is longer than 15 bytes", name)))?;

                Mode::Client(ClientSettings {
                    server: server.unwrap_or(toml_config.client.server),
                    name,
                })
            }
        };

        Ok(Config {
            mode,
            poll_timeout: Duration::from_millis(toml_config.runtime.poll_timeout_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("select-chat").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:5555");
        assert_eq!(config.server.max_sessions, 10);
        assert_eq!(config.client.server, "127.0.0.1:5555");
        assert_eq!(config.runtime.poll_timeout_ms, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:6000"
            max_sessions = 32

            [client]
            server = "chat.local:6000"

            [runtime]
            poll_timeout_ms = 250

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:6000");
        assert_eq!(config.server.max_sessions, 32);
        assert_eq!(config.client.server, "chat.local:6000");
        assert_eq!(config.runtime.poll_timeout_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:6000"
            max_sessions = 32
            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["--log-level", "trace", "serve", "--max-sessions", "5", "--no-console"]),
            toml_config,
        )
        .unwrap();

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.poll_timeout, Duration::from_millis(500));
        match config.mode {
            Mode::Server(settings) => {
                assert_eq!(settings.listen, "0.0.0.0:6000".parse().unwrap());
                assert_eq!(settings.max_sessions, 5);
                assert!(!settings.console);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_max_sessions_bounds() {
        for bad in ["0", "255"] {
            let result = Config::merge(cli(&["serve", "-m", bad]), TomlConfig::default());
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
        }
        assert!(Config::merge(cli(&["serve", "-m", "254"]), TomlConfig::default()).is_ok());
    }

    #[test]
    fn test_connect_name_validation() {
        let config = Config::merge(cli(&["connect", "alice"]), TomlConfig::default()).unwrap();
        match config.mode {
            Mode::Client(settings) => {
                assert_eq!(settings.server, "127.0.0.1:5555");
                assert_eq!(settings.name.as_bytes(), b"alice");
            }
            other => panic!("unexpected mode: {:?}", other),
        }

        let result = Config::merge(
            cli(&["connect", "a-name-far-too-long"]),
            TomlConfig::default(),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
