//! Configuration file management for certscout.
//!
//! Settings can come from three places. Later sources win:
//!
//! 1. Default values
//! 2. Configuration file (`certscout.toml` or the file given with `--config`)
//! 3. Command-line arguments
//!
//! The merged [`Config`] is then resolved once into an immutable [`Settings`]
//! that the dialer and the scanner are built from.
//!
//! # Example Configuration File
//!
//! ```toml
//! extract_domains = true
//! routines = 100
//! timeout = "5s"
//! plus_www = true
//! insecure = false
//!
//! [prometheus]
//! enabled = false
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::FieldExtractor;

/// Name of the configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "certscout.toml";

/// Layered configuration.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Print only the host of each URL instead of the URL
    pub extract_domains: Option<bool>,
    /// Number of concurrent workers
    pub routines: Option<usize>,
    /// Per-host connection timeout, e.g. "5s" or "750ms"
    pub timeout: Option<String>,
    /// Also scan `www.<domain>` for domains without that prefix
    pub plus_www: Option<bool>,
    /// Skip certificate chain and host name verification
    pub insecure: Option<bool>,
    /// Extra PEM bundle of trusted CA certificates
    pub ca_file: Option<PathBuf>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus integration configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Push scan counters when the scan finishes
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

impl Default for Config {
    /// # Default Values
    ///
    /// - `extract_domains`: true
    /// - `routines`: 100
    /// - `timeout`: "5s"
    /// - `plus_www`: true
    /// - `insecure`: false
    /// - `ca_file`: None
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    fn default() -> Self {
        Config {
            extract_domains: Some(true),
            routines: Some(100),
            timeout: Some("5s".to_string()),
            plus_www: Some(true),
            insecure: Some(false),
            ca_file: None,
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, a `Some` in `other` replaces the current value and a
    /// `None` keeps it.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.extract_domains.is_some() {
            self.extract_domains = other.extract_domains;
        }
        if other.routines.is_some() {
            self.routines = other.routines;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        if other.plus_www.is_some() {
            self.plus_www = other.plus_www;
        }
        if other.insecure.is_some() {
            self.insecure = other.insecure;
        }
        if other.ca_file.is_some() {
            self.ca_file = other.ca_file;
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            extract_domains: Some(true),
            routines: Some(200),
            timeout: Some("3s".to_string()),
            plus_www: Some(false),
            insecure: Some(true),
            ca_file: Some(PathBuf::from("/etc/ssl/certs/ca-certificates.crt")),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Fully resolved, immutable settings for one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub extractor: FieldExtractor,
    pub routines: usize,
    pub timeout: Duration,
    pub plus_www: bool,
    pub insecure: bool,
    pub ca_file: Option<PathBuf>,
    /// Push gateway address, present only when pushing is enabled
    pub prometheus_address: Option<String>,
}

impl Settings {
    /// Resolves `config` on top of the defaults and validates the result.
    pub fn from_config(config: Config) -> Result<Settings, ConfigError> {
        let config = Config::default().merge_with(config);

        let routines = config.routines.unwrap_or(100);
        if routines == 0 {
            return Err(ConfigError::Validation(
                "routines must be at least 1".to_string(),
            ));
        }

        let timeout = match config.timeout {
            Some(ref raw) => parse_duration(raw)?,
            None => Duration::from_secs(5),
        };
        if timeout.is_zero() {
            return Err(ConfigError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let prometheus_address = config.prometheus.and_then(|prom| {
            if prom.enabled.unwrap_or(false) {
                Some(
                    prom.address
                        .unwrap_or_else(|| "http://localhost:9091".to_string()),
                )
            } else {
                None
            }
        });

        Ok(Settings {
            extractor: FieldExtractor::from_flag(config.extract_domains.unwrap_or(true)),
            routines,
            timeout,
            plus_www: config.plus_www.unwrap_or(true),
            insecure: config.insecure.unwrap_or(false),
            ca_file: config.ca_file,
            prometheus_address,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            extractor: FieldExtractor::DomainJoin,
            routines: 100,
            timeout: Duration::from_secs(5),
            plus_www: true,
            insecure: false,
            ca_file: None,
            prometheus_address: None,
        }
    }
}

/// Parses a timeout such as `5s`, `250ms`, `1m30s` or `1m 30s`.
///
/// Units follow `humantime`: `ns`, `us`, `ms`, `s`, `m`, `h` and the longer
/// spellings it accepts. Every number needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(input.trim())
        .map_err(|e| ConfigError::Validation(format!("invalid duration {:?}: {}", input, e)))
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (invalid values)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
