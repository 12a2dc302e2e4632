//! Logging infrastructure for the PocketBase SDK
//!
//! All crates in the workspace log through `tracing`; this module installs a
//! subscriber for applications that do not bring their own.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with source locations
    Debug,
    /// One JSON object per line, for log collectors
    Json,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// # Examples
///
/// ```rust,ignore
/// use pocketbase_sdk::logging::{init_logging, LoggingMode};
///
/// init_logging(LoggingMode::Development)?;
/// ```
///
/// # Environment Variables
///
/// - `POCKETBASE_LOG_LEVEL`: Override log level (error, warn, info, debug, trace)
/// - `POCKETBASE_LOG_TARGET`: Restrict output to one target (e.g. "realtime::coordinator")
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Json => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(fmt::layer().json().with_current_span(false))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `POCKETBASE_LOG_MODE`
///
/// Accepts "development", "debug" and "json"; anything else is silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_logging(mode_from_env(std::env::var("POCKETBASE_LOG_MODE").ok().as_deref()))
}

fn mode_from_env(value: Option<&str>) -> LoggingMode {
    match value {
        Some("development") => LoggingMode::Development,
        Some("debug") => LoggingMode::Debug,
        Some("json") => LoggingMode::Json,
        _ => LoggingMode::Silent,
    }
}

/// Build the filter: `POCKETBASE_LOG_LEVEL`, then `RUST_LOG`, then the default
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let level = std::env::var("POCKETBASE_LOG_LEVEL").ok();
    let target = std::env::var("POCKETBASE_LOG_TARGET").ok();

    if level.is_none() && target.is_none() {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            return EnvFilter::try_new(&rust_log)
                .map_err(|e| LoggingError::InvalidEnv(format!("RUST_LOG: {}", e)));
        }
    }

    filter_directive(level.as_deref().unwrap_or(default_level), target.as_deref())
}

fn filter_directive(level: &str, target: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directive = match target {
        Some(target) if !target.is_empty() => format!("{}={}", target, level),
        _ => level.to_string(),
    };

    EnvFilter::try_new(&directive)
        .map_err(|e| LoggingError::InvalidEnv(format!("{}: {}", directive, e)))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_mode_from_env() {
        assert_eq!(mode_from_env(Some("json")), LoggingMode::Json);
        assert_eq!(mode_from_env(Some("debug")), LoggingMode::Debug);
        assert_eq!(mode_from_env(Some("development")), LoggingMode::Development);
        assert_eq!(mode_from_env(Some("loud")), LoggingMode::Silent);
        assert_eq!(mode_from_env(None), LoggingMode::Silent);
    }

    #[test]
    fn test_filter_directive() {
        let filter = filter_directive("debug", Some("realtime::coordinator")).unwrap();
        assert_eq!(filter.to_string(), "realtime::coordinator=debug");

        let filter = filter_directive("warn", None).unwrap();
        assert_eq!(filter.to_string(), "warn");
    }
}
