// Configuration File Support
//
// This module provides configuration file parsing for the upload guard service.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/uploadguard/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Admin access configuration
    pub admin: AdminConfig,

    /// Policy persistence configuration
    pub policy: PolicyConfig,

    /// Idle client eviction configuration
    pub eviction: EvictionConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,

    /// Key upload limits on X-Client-Id / X-Forwarded-For (only behind a trusted proxy)
    pub trust_client_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            trust_client_headers: false,
        }
    }
}

/// Admin access configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Admin password (None disables configuration writes)
    pub password: Option<String>,

    /// Require the admin password for GET /api/admin/config
    pub protect_reads: bool,
}

/// Policy persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// JSON file holding the upload policy
    pub path: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: "./data/upload-policy.json".to_string(),
        }
    }
}

/// Idle client eviction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvictionConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            admin: AdminConfig::default(),
            policy: PolicyConfig::default(),
            eviction: EvictionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the result (after environment overrides) fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/uploadguard/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "uploadguard", "UploadGuard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("uploadguard").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - UPLOADGUARD_LOG_LEVEL
    /// - UPLOADGUARD_LOG_FORMAT
    /// - UPLOADGUARD_BIND
    /// - UPLOADGUARD_PORT
    /// - UPLOADGUARD_TRUST_CLIENT_HEADERS
    /// - UPLOADGUARD_ADMIN_PASSWORD
    /// - UPLOADGUARD_PROTECT_READS
    /// - UPLOADGUARD_POLICY_PATH
    /// - UPLOADGUARD_EVICTION_INTERVAL_SECS
    /// - UPLOADGUARD_METRICS_ENABLED
    pub fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("UPLOADGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("UPLOADGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Server overrides
        if let Ok(bind) = std::env::var("UPLOADGUARD_BIND") {
            if bind.parse::<IpAddr>().is_ok() {
                self.server.bind = bind;
            }
        }
        if let Ok(port) = std::env::var("UPLOADGUARD_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                if port > 0 {
                    self.server.port = port;
                }
            }
        }

        if let Ok(trust) = std::env::var("UPLOADGUARD_TRUST_CLIENT_HEADERS") {
            self.server.trust_client_headers =
                trust.parse().unwrap_or(self.server.trust_client_headers);
        }

        // Admin overrides
        if let Ok(password) = std::env::var("UPLOADGUARD_ADMIN_PASSWORD") {
            if !password.is_empty() {
                self.admin.password = Some(password);
            }
        }
        if let Ok(protect) = std::env::var("UPLOADGUARD_PROTECT_READS") {
            self.admin.protect_reads = protect.parse().unwrap_or(self.admin.protect_reads);
        }

        // Policy overrides
        if let Ok(path) = std::env::var("UPLOADGUARD_POLICY_PATH") {
            if !path.is_empty() {
                self.policy.path = path;
            }
        }

        // Eviction overrides
        if let Ok(interval) = std::env::var("UPLOADGUARD_EVICTION_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse::<u64>() {
                if interval > 0 {
                    self.eviction.interval_secs = interval;
                }
            }
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("UPLOADGUARD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        if self.server.bind.parse::<IpAddr>().is_err() {
            anyhow::bail!("Invalid bind address: {}", self.server.bind);
        }
        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        if self.policy.path.trim().is_empty() {
            anyhow::bail!("Policy path must not be empty");
        }

        if self.eviction.interval_secs == 0 {
            anyhow::bail!("Eviction interval must be > 0 seconds");
        }

        if self.admin.protect_reads && self.admin.password.is_none() {
            tracing::warn!("admin.protect_reads is set but no admin password is configured; policy reads will always be rejected");
        } else if self.admin.protect_reads {
            tracing::warn!("admin.protect_reads breaks the admin panel login, which reads the policy before sending a password");
        }

        Ok(())
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.server.bind.parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Eviction sweep interval
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction.interval_secs)
    }
}
