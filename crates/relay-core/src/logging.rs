//! Logging setup and per-session log objects

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::refcnt::{FaultHandler, Rco};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Application name to include in logs
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "rvoip-relay".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }
}

/// Install the global subscriber
///
/// Fails with [`Error::Config`] if a subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::Config(format!("logging already initialised: {}", e)))?;

    tracing::info!("Starting {}", config.app_name);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

fn level_rank(level: Level) -> u8 {
    if level == Level::ERROR {
        1
    } else if level == Level::WARN {
        2
    } else if level == Level::INFO {
        3
    } else if level == Level::DEBUG {
        4
    } else {
        5
    }
}

/// Log bound to one call
///
/// Every line carries the call id as a structured field and is filtered by a
/// per-session threshold on top of the global subscriber filter.
#[derive(Debug)]
pub struct SessionLog {
    call_id: String,
    app: RwLock<String>,
    threshold: AtomicU8,
    started: AtomicBool,
}

impl SessionLog {
    /// Create a log for `call_id`
    pub fn new(app: &str, call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            app: RwLock::new(app.to_string()),
            threshold: AtomicU8::new(level_rank(Level::INFO)),
            started: AtomicBool::new(false),
        }
    }

    /// Create a reference-counted log for `call_id`
    pub fn new_shared(app: &str, call_id: &str, faults: Arc<dyn FaultHandler>) -> Rco<SessionLog> {
        Rco::with_faults("session_log", Self::new(app, call_id), faults)
    }

    /// Bind the log to the running configuration
    pub fn start(&self, config: &RelayConfig) {
        *self.app.write() = config.app_name.clone();
        self.started.store(true, Ordering::Release);
    }

    /// Whether [`SessionLog::start`] has been called
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Set the most verbose level this log lets through
    pub fn set_level(&self, level: Level) {
        self.threshold.store(level_rank(level), Ordering::Relaxed);
    }

    /// Whether a line at `level` passes the session threshold
    pub fn enabled(&self, level: Level) -> bool {
        level_rank(level) <= self.threshold.load(Ordering::Relaxed)
    }

    /// Call id this log is bound to
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Emit one line at `level`
    pub fn log(&self, level: Level, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let app = self.app.read();
        let app = app.as_str();
        let call_id = self.call_id.as_str();
        match level_rank(level) {
            1 => tracing::error!(app, call_id, "{}", message),
            2 => tracing::warn!(app, call_id, "{}", message),
            3 => tracing::info!(app, call_id, "{}", message),
            4 => tracing::debug!(app, call_id, "{}", message),
            _ => tracing::trace!(app, call_id, "{}", message),
        }
    }

    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("chatty"), Err(Error::Config(_))));
    }

    #[test]
    fn test_session_threshold() {
        let log = SessionLog::new("test", "call-1");
        assert!(log.enabled(Level::INFO));
        assert!(!log.enabled(Level::DEBUG));

        log.set_level(Level::ERROR);
        assert!(log.enabled(Level::ERROR));
        assert!(!log.enabled(Level::WARN));

        log.set_level(Level::TRACE);
        assert!(log.enabled(Level::TRACE));
    }

    #[test]
    fn test_start_binds_app_name() {
        let log = SessionLog::new("boot", "call-1");
        assert!(!log.is_started());
        log.start(&RelayConfig::default());
        assert!(log.is_started());
        assert_eq!(log.app.read().as_str(), "rvoip-relay");
        assert_eq!(log.call_id(), "call-1");
    }
}
