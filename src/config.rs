//! Connection manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::serde_helpers::duration_ms;
use crate::websocket::ReconnectPolicy;

/// Configuration for a [`ConnectionManager`](crate::websocket::ConnectionManager)
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Base WebSocket endpoint; the client identity is appended as a path segment
    pub url: String,
    /// Reconnection backoff and attempt budget
    pub reconnect: ReconnectPolicy,
    /// Interval between liveness probes while the connection is open
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Timeout for establishing a single connection
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            url: Self::DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ManagerConfig {
    /// Default endpoint of a locally running job server
    pub const DEFAULT_WS_URL: &'static str = "ws://localhost:8000/ws";

    /// Create a new configuration with the given base endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ManagerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the delay before the first reconnection attempt.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.reconnect.base_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.reconnect.max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect.backoff_factor = factor;
        self
    }

    /// Set the number of automatic reconnection attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("URL cannot be empty".to_string()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "URL must use the ws:// or wss:// scheme: {}",
                self.url
            )));
        }
        self.reconnect.validate()?;
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("Heartbeat interval must be > 0".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("Connect timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.url, ManagerConfig::DEFAULT_WS_URL);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(3000));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new("wss://jobs.example.com/ws")
            .base_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(5))
            .backoff_factor(2.0)
            .max_attempts(3)
            .heartbeat_interval(Duration::from_secs(10));

        assert_eq!(config.url, "wss://jobs.example.com/ws");
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect.backoff_factor, 2.0);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ManagerConfig::new("").validate().is_err());
        assert!(ManagerConfig::new("http://example.com").validate().is_err());
        assert!(ManagerConfig::default()
            .heartbeat_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ManagerConfig::default()
            .backoff_factor(0.9)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_json() {
        let config = ManagerConfig::from_json(
            r#"{
                "url": "wss://jobs.example.com/ws",
                "heartbeat_interval": 15000,
                "reconnect": { "base_delay": 1000, "max_attempts": 4 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts, 4);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_json_validates() {
        let result = ManagerConfig::from_json(r#"{"url": "ftp://example.com"}"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
