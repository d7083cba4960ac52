//! Configuration management

use crate::utils::string::{is_channel_name, is_wire_safe};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Channels joined after every registration
    pub channels: Vec<String>,
    /// IRCv3 capabilities requested when the server offers them
    pub capabilities: Vec<String>,
    /// Server to connect to
    pub server: ServerConfig,
    /// Who we are on the network
    pub identity: IdentityConfig,
    /// Reconnect and timeout settings
    pub reconnect: ReconnectConfig,
    /// State store limits
    pub state: StateConfig,
}

/// Server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or IP address
    pub host: String,
    pub port: u16,
    /// Connection password sent with PASS
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6667,
            password: None,
        }
    }
}

/// Registration identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub nick: String,
    /// Tried in order when the nick is taken
    pub alt_nicks: Vec<String>,
    pub username: String,
    pub realname: String,
    /// Sent with QUIT on shutdown
    pub quit_message: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            nick: "ircwatch".to_string(),
            alt_nicks: Vec::new(),
            username: "ircwatch".to_string(),
            realname: "IRC state tracker".to_string(),
            quit_message: "Shutting down".to_string(),
        }
    }
}

/// Backoff and timeout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for the retry delay in milliseconds
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, 0.0 to 1.0
    pub jitter: f64,
    /// Connected time after which the backoff starts over, in seconds
    pub stable_after_secs: u64,
    pub connect_timeout_secs: u64,
    pub registration_timeout_secs: u64,
    /// Silence after which the link is considered dead, in seconds
    pub read_timeout_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            jitter: 0.2,
            stable_after_secs: 60,
            connect_timeout_secs: 15,
            registration_timeout_secs: 30,
            read_timeout_secs: 300,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Bounds on retained history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Server errors kept in the error log
    pub error_log_capacity: usize,
    /// Unhandled lines kept in the event log
    pub event_log_capacity: usize,
    /// Outbound commands buffered while disconnected
    pub outbound_queue: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            error_log_capacity: 100,
            event_log_capacity: 100,
            outbound_queue: 256,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("Server host cannot be empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(Error::Config("Server port cannot be 0".to_string()));
        }
        if let Some(ref password) = self.server.password {
            if password.is_empty() || password.contains(' ') || !is_wire_safe(password) {
                return Err(Error::Config("Server password is not a valid argument".to_string()));
            }
        }

        for nick in std::iter::once(&self.identity.nick).chain(&self.identity.alt_nicks) {
            if !is_valid_nick(nick) {
                return Err(Error::Config(format!("Invalid nickname: {:?}", nick)));
            }
        }
        if self.identity.username.is_empty() || self.identity.username.contains(' ') {
            return Err(Error::Config("Username must be a single word".to_string()));
        }
        if !is_wire_safe(&self.identity.realname) || !is_wire_safe(&self.identity.quit_message) {
            return Err(Error::Config("Realname and quit message must be single lines".to_string()));
        }

        for channel in &self.channels {
            if !is_channel_name(channel) || channel.contains([' ', ',']) || !is_wire_safe(channel) {
                return Err(Error::Config(format!("Invalid channel name: {:?}", channel)));
            }
        }
        for cap in &self.capabilities {
            if cap.is_empty() || cap.contains(' ') || !is_wire_safe(cap) {
                return Err(Error::Config(format!("Invalid capability: {:?}", cap)));
            }
        }

        let reconnect = &self.reconnect;
        if reconnect.base_delay_ms == 0 {
            return Err(Error::Config("Reconnect base delay must be positive".to_string()));
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(Error::Config("Reconnect max delay is below the base delay".to_string()));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(Error::Config("Reconnect jitter must be between 0.0 and 1.0".to_string()));
        }
        if reconnect.connect_timeout_secs == 0
            || reconnect.registration_timeout_secs == 0
            || reconnect.read_timeout_secs == 0
        {
            return Err(Error::Config("Timeouts must be positive".to_string()));
        }

        if self.state.outbound_queue == 0 {
            return Err(Error::Config("Outbound queue size must be positive".to_string()));
        }

        Ok(())
    }

    /// `host:port` of the configured server
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn is_valid_nick(nick: &str) -> bool {
    let mut chars = nick.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || "[]\\`_^{|}".contains(c) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || "[]\\`_^{|}-".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.address(), "127.0.0.1:6667");
        assert_eq!(config.reconnect.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r##"
            channels = ["#rust", "#tokio"]

            [identity]
            nick = "Hanna"
            alt_nicks = ["Hanna_"]
            "##,
        )
        .unwrap();
        assert_eq!(config.identity.nick, "Hanna");
        assert_eq!(config.identity.username, "ircwatch");
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.server.port, 6667);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.identity.nick = "9lives".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channels = vec!["rust".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reconnect.max_delay_ms = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reconnect.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.identity.realname = "two\r\nlines".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nick_rules() {
        assert!(is_valid_nick("Hanna"));
        assert!(is_valid_nick("[bot]-2"));
        assert!(!is_valid_nick(""));
        assert!(!is_valid_nick("-dash"));
        assert!(!is_valid_nick("has space"));
    }
}
