//! Relay configuration
//!
//! The configuration is loaded once (from TOML or built in code), validated,
//! and then shared read-only through the
//! [`RelayContext`](crate::context::RelayContext).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::parse_log_level;

/// How TTL tokens are shared between the two sides of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlMode {
    /// The callee side shares the caller side's token: one countdown per session
    #[default]
    Shared,
    /// Each side has its own token: two countdowns per session
    Independent,
}

/// Main configuration for the relay session core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// TTL sharing between sides
    pub ttl_mode: TtlMode,
    /// Sweep ticks a freshly created session may stay silent
    pub max_setup_ttl: u32,
    /// Sweep ticks restored whenever media arrives on a stream
    pub max_ttl: u32,
    /// Default per-session log level ("error", "warn", "info", "debug", "trace")
    pub log_level: String,
    /// Upper bound on sessions in the polling table
    pub max_sessions: Option<usize>,
    /// Upper bound on streams per media type
    pub max_streams: Option<usize>,
    /// Period of the TTL sweep in milliseconds
    pub sweep_interval_ms: u64,
    /// Application name stamped on session logs
    pub app_name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ttl_mode: TtlMode::Shared,
            max_setup_ttl: 60,
            max_ttl: 60,
            log_level: "info".to_string(),
            max_sessions: None,
            max_streams: None,
            sweep_interval_ms: 1000,
            app_name: "rvoip-relay".to_string(),
        }
    }
}

impl RelayConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RelayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the session core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_setup_ttl == 0 {
            return Err(Error::Config("max_setup_ttl must be positive".to_string()));
        }
        if self.max_ttl == 0 {
            return Err(Error::Config("max_ttl must be positive".to_string()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config("sweep_interval_ms must be positive".to_string()));
        }
        parse_log_level(&self.log_level)?;
        Ok(())
    }

    /// Builder-style TTL mode override
    pub fn with_ttl_mode(mut self, mode: TtlMode) -> Self {
        self.ttl_mode = mode;
        self
    }

    /// Builder-style setup TTL override
    pub fn with_setup_ttl(mut self, ticks: u32) -> Self {
        self.max_setup_ttl = ticks;
        self
    }
}
