/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Chat core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST backend (history, send, conversation list)
    pub api_base_url: String,

    /// URL of the live socket server
    pub socket_url: String,

    /// Max automatic reconnection attempts before the transport gives up
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,

    /// Page size for history fetches
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:5000/api".to_string(),
            socket_url: "ws://127.0.0.1:5001".to_string(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Config {
    /// Create config from environment variables, falling back to defaults
    ///
    /// Recognized variables: TRAFELLOW_API_URL, TRAFELLOW_SOCKET_URL,
    /// TRAFELLOW_RECONNECT_ATTEMPTS, TRAFELLOW_RECONNECT_DELAY_MS,
    /// TRAFELLOW_HISTORY_LIMIT.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("TRAFELLOW_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("TRAFELLOW_SOCKET_URL") {
            config.socket_url = url;
        }
        if let Ok(v) = std::env::var("TRAFELLOW_RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = v.parse::<u32>().map_err(|_| {
                ChatError::Config("TRAFELLOW_RECONNECT_ATTEMPTS must be a number".to_string())
            })?;
        }
        if let Ok(v) = std::env::var("TRAFELLOW_RECONNECT_DELAY_MS") {
            let ms = v.parse::<u64>().map_err(|_| {
                ChatError::Config("TRAFELLOW_RECONNECT_DELAY_MS must be a number".to_string())
            })?;
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("TRAFELLOW_HISTORY_LIMIT") {
            config.history_limit = v.parse::<usize>().map_err(|_| {
                ChatError::Config("TRAFELLOW_HISTORY_LIMIT must be a number".to_string())
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the config is usable
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(ChatError::Config("api_base_url must not be empty".to_string()));
        }
        if self.socket_url.is_empty() {
            return Err(ChatError::Config("socket_url must not be empty".to_string()));
        }
        if self.history_limit == 0 {
            return Err(ChatError::Config("history_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn empty_history_limit_rejected() {
        let config = Config {
            history_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
