//! Configuration management for the termshare server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termshare/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("listen address must be host:port, got {0}")]
    InvalidListenAddr(String),

    #[error("session name must be non-empty and contain only letters, digits, '-' and '_', got {0:?}")]
    InvalidSessionName(String),

    #[error("cols must be between 1 and 1000, got {0}")]
    InvalidCols(u16),

    #[error("rows must be between 1 and 1000, got {0}")]
    InvalidRows(u16),

    #[error("command not found: {0}")]
    InvalidCommand(String),

    #[error("shutdown_grace_ms must be at most 60000, got {0}")]
    InvalidGracePeriod(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the termshare server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Shared terminal configuration.
    pub terminal: TerminalConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen: String,

    /// Session name used in the WebSocket path (`/s/{name}/ws`).
    pub session_name: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Shared terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Command to run inside the shared terminal.
    pub command: String,

    /// Arguments passed to the command.
    pub args: Vec<String>,

    /// Terminal width used when stdin is not a terminal.
    pub cols: u16,

    /// Terminal height used when stdin is not a terminal.
    pub rows: u16,

    /// How long to wait after SIGTERM before force-killing the child, in
    /// milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
            session_name: "local".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            cols: 140,
            rows: 32,
            shutdown_grace_ms: 2000,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termshare")
        .join("config.toml")
}

/// Returns the default command for the shared terminal.
fn default_command() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMSHARE_LISTEN: Override the listen address
    /// - TERMSHARE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("TERMSHARE_LISTEN") {
            if !listen.is_empty() {
                tracing::info!("Overriding listen address from environment: {}", listen);
                self.server.listen = listen;
            }
        }

        if let Ok(level) = std::env::var("TERMSHARE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate listen address shape: host:port with a numeric port
        let listen = &self.server.listen;
        let valid_listen = match listen.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        };
        if !valid_listen {
            return Err(ConfigError::InvalidListenAddr(listen.clone()));
        }

        // Validate session name: non-empty, URL-path-safe
        let name = &self.server.session_name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidSessionName(name.clone()));
        }

        // Validate terminal dimensions: 1-1000
        if self.terminal.cols < 1 || self.terminal.cols > 1000 {
            return Err(ConfigError::InvalidCols(self.terminal.cols));
        }
        if self.terminal.rows < 1 || self.terminal.rows > 1000 {
            return Err(ConfigError::InvalidRows(self.terminal.rows));
        }

        // Validate shutdown grace: 0-60000 ms
        if self.terminal.shutdown_grace_ms > 60000 {
            return Err(ConfigError::InvalidGracePeriod(
                self.terminal.shutdown_grace_ms,
            ));
        }

        // Validate command path exists
        let command_path = std::path::Path::new(&self.terminal.command);

        // Check if it's an absolute path that exists
        if command_path.is_absolute() {
            if !command_path.exists() {
                return Err(ConfigError::InvalidCommand(self.terminal.command.clone()));
            }
        } else {
            // For non-absolute paths, try to find in PATH
            if which::which(&self.terminal.command).is_err() {
                return Err(ConfigError::InvalidCommand(self.terminal.command.clone()));
            }
        }

        // Validate log_level is a known value
        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/termshare/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
