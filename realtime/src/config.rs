//! Configuration types for the realtime crate
//!
//! This module defines the configuration that controls connection timeouts
//! and the reconnection policy applied when an open stream drops.

use std::time::Duration;

use crate::error::{RealtimeError, Result};

/// Path of the realtime endpoint relative to the backend base URL
pub const REALTIME_PATH: &str = "/api/realtime";

/// Configuration for the realtime service
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Time allowed to open the stream and receive the client id
    /// Default: 15 seconds
    pub connect_timeout: Duration,

    /// Reopen the stream when it drops while topics are still subscribed
    /// Default: true
    pub auto_reconnect: bool,

    /// Delay before each reconnect attempt; the last entry repeats
    /// Default: 200ms, 300ms, 500ms, 1s, 1.2s, 1.5s, 2s
    pub reconnect_intervals: Vec<Duration>,

    /// Give up after this many consecutive failed attempts (`None` = never)
    /// Default: None
    pub max_reconnect_attempts: Option<usize>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            auto_reconnect: true,
            reconnect_intervals: [200, 300, 500, 1000, 1200, 1500, 2000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            max_reconnect_attempts: None,
        }
    }
}

impl RealtimeConfig {
    /// Create a new RealtimeConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RealtimeConfig that never reopens a dropped stream
    pub fn without_reconnect() -> Self {
        Self {
            auto_reconnect: false,
            ..Default::default()
        }
    }

    /// Create a RealtimeConfig with short delays, mostly useful in tests
    pub fn fast_reconnect() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            reconnect_intervals: vec![Duration::from_millis(10), Duration::from_millis(50)],
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == Duration::ZERO {
            return Err(RealtimeError::Configuration(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.auto_reconnect && self.reconnect_intervals.is_empty() {
            return Err(RealtimeError::Configuration(
                "Reconnect intervals must not be empty when auto reconnect is enabled".to_string(),
            ));
        }

        if self.max_reconnect_attempts == Some(0) && self.auto_reconnect {
            return Err(RealtimeError::Configuration(
                "Max reconnect attempts must be greater than 0; disable auto reconnect instead"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Delay before the reconnect attempt with the given zero-based index
    pub fn reconnect_delay(&self, attempt: usize) -> Duration {
        self.reconnect_intervals
            .get(attempt)
            .or_else(|| self.reconnect_intervals.last())
            .copied()
            .unwrap_or_default()
    }

    /// Whether another reconnect attempt is allowed after `attempts` failures
    pub fn can_reconnect(&self, attempts: usize) -> bool {
        self.auto_reconnect && self.max_reconnect_attempts.map_or(true, |max| attempts < max)
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.reconnect_intervals = intervals;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: usize) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}
