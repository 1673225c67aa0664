//! Configuration loading using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. `config/mux.toml` (or a path given on the command line)
//! 3. Environment variables prefixed with `MUX_CONTROL_`, nested keys
//!    separated by `__` (e.g. `MUX_CONTROL_BOARD__ADDRESS=10.42.0.54:23`)
//!
//! Durations are written in humantime form (`"10s"`, `"500ms"`).
//!
//! # Example
//! ```no_run
//! use mux_control::config::MuxConfig;
//!
//! let config = MuxConfig::load()?;
//! config.validate()?;
//! let options = config.session_options();
//! # Ok::<(), mux_control::MuxError>(())
//! ```

use crate::error::{MuxError, MuxResult};
use crate::session::SessionOptions;
use crate::transport::{parse_address, Keepalive, TransportOptions};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/mux.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MUX_CONTROL_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Logging
    pub application: ApplicationConfig,
    /// Board connection
    pub board: BoardConfig,
    /// TCP keep-alive
    pub keepalive: KeepaliveConfig,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// pretty, compact or json
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Control board connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// `host:port` of the board
    pub address: Option<String>,
    /// Skip reading adapter calibration resistors
    pub ignore_adapter_resistors: bool,
    /// Deadline for each reply, e.g. `"10s"`
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
    /// Deadline for the TCP connect
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            address: None,
            ignore_adapter_resistors: false,
            response_timeout: crate::protocol::DEFAULT_RESPONSE_TIMEOUT,
            connect_timeout: crate::transport::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// TCP keep-alive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe
    #[serde(with = "humantime_serde")]
    pub idle: Duration,
    /// Time between probes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Unanswered probes before the peer is declared dead
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        let keepalive = Keepalive::default();
        Self {
            idle: keepalive.idle,
            interval: keepalive.interval,
            retries: keepalive.retries,
        }
    }
}

impl MuxConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> MuxResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file is not
    /// an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MuxResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that deserialize fine but make no sense.
    pub fn validate(&self) -> MuxResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MuxError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(MuxError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if let Some(address) = &self.board.address {
            parse_address(address)?;
        }

        if self.board.response_timeout.is_zero() {
            return Err(MuxError::Configuration(
                "board.response_timeout must be greater than zero".into(),
            ));
        }

        if self.board.connect_timeout.is_zero() {
            return Err(MuxError::Configuration(
                "board.connect_timeout must be greater than zero".into(),
            ));
        }

        if self.keepalive.retries == 0 {
            return Err(MuxError::Configuration(
                "keepalive.retries must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Session options described by this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ignore_adapter_resistors: self.board.ignore_adapter_resistors,
            response_timeout: self.board.response_timeout,
            transport: TransportOptions {
                connect_timeout: self.board.connect_timeout,
                keepalive: Keepalive {
                    idle: self.keepalive.idle,
                    interval: self.keepalive.interval,
                    retries: self.keepalive.retries,
                },
            },
        }
    }
}
