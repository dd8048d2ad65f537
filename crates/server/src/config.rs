//! Server configuration.
//!
//! [`ServerConfig`] is usually loaded from a TOML file with
//! [`ServerConfig::load`]. Serde handles the syntax and rejects unknown keys,
//! [`ServerConfig::validate`] checks the values and reports every problem at
//! once.
//!
//! ```toml
//! connection_limit = 10000
//! connections_per_ip_limit = 30
//! tls_handshake_timeout = 5.0
//! alpn_protocols = ["h2", "http/1.1"]
//! compression = true
//! drain_timeout = 10.0
//!
//! [parser]
//! max_header_bytes = 8192
//! max_body_bytes = 10485760
//! ```

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use harbor_http::config::ParserConfig;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub const DEFAULT_CONNECTION_LIMIT: usize = 10_000;

pub const DEFAULT_CONNECTIONS_PER_IP_LIMIT: usize = 30;

pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest protocol name ALPN can carry.
const MAX_ALPN_PROTOCOL_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("can't parse config: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("invalid config: {}", problems.join(", "))]
    Invalid { problems: Vec<String> },
}

/// Limits and switches of an [`HttpServer`](crate::HttpServer).
///
/// Durations are written as seconds, fractions allowed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Connections open at the same time across all clients.
    pub connection_limit: usize,
    /// Connections open at the same time from one network (IPv4 address or IPv6 /56).
    pub connections_per_ip_limit: usize,
    #[serde(deserialize_with = "seconds")]
    pub tls_handshake_timeout: Duration,
    /// Protocols offered during ALPN, in order of preference.
    pub alpn_protocols: Vec<String>,
    /// Gzip response bodies for clients that accept it.
    pub compression: bool,
    /// How long [`stop`](crate::HttpServer::stop) waits for open connections
    /// before closing them. `None` closes them right away.
    #[serde(deserialize_with = "optional_seconds")]
    pub drain_timeout: Option<Duration>,
    pub parser: ParserConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            connections_per_ip_limit: DEFAULT_CONNECTIONS_PER_IP_LIMIT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            alpn_protocols: vec!["h2".to_owned(), "http/1.1".to_owned()],
            compression: true,
            drain_timeout: None,
            parser: ParserConfig::request(),
        }
    }
}

impl ServerConfig {
    /// Reads, parses and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.connection_limit == 0 {
            problems.push("connection_limit must be greater than 0".to_owned());
        }
        if self.connections_per_ip_limit == 0 {
            problems.push("connections_per_ip_limit must be greater than 0".to_owned());
        }
        if self.tls_handshake_timeout.is_zero() {
            problems.push("tls_handshake_timeout must be greater than 0".to_owned());
        }
        if self.alpn_protocols.is_empty() {
            problems.push("alpn_protocols must not be empty".to_owned());
        }
        for protocol in &self.alpn_protocols {
            if protocol.is_empty() || protocol.len() > MAX_ALPN_PROTOCOL_LEN {
                problems.push(format!("alpn protocol {protocol:?} must be 1 to {MAX_ALPN_PROTOCOL_LEN} bytes long"));
            }
        }
        if self.parser.max_header_bytes == 0 {
            problems.push("parser.max_header_bytes must be greater than 0".to_owned());
        }
        if self.parser.body_swap_threshold == 0 {
            problems.push("parser.body_swap_threshold must be greater than 0".to_owned());
        }

        if problems.is_empty() { Ok(()) } else { Err(ConfigError::Invalid { problems }) }
    }

    #[must_use]
    pub fn with_connection_limit(mut self, connection_limit: usize) -> Self {
        self.connection_limit = connection_limit;
        self
    }

    #[must_use]
    pub fn with_connections_per_ip_limit(mut self, connections_per_ip_limit: usize) -> Self {
        self.connections_per_ip_limit = connections_per_ip_limit;
        self
    }

    #[must_use]
    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_alpn_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Option<Duration>) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

fn optional_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    seconds(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.connection_limit, 10_000);
        assert_eq!(config.connections_per_ip_limit, 30);
        assert_eq!(config.tls_handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.alpn_protocols, ["h2", "http/1.1"]);
        assert!(config.compression);
        assert_eq!(config.drain_timeout, None);
        assert_eq!(config.parser, ParserConfig::request());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_toml() {
        let config = ServerConfig::from_toml(indoc! {r#"
            connections_per_ip_limit = 4
            tls_handshake_timeout = 2.5
            alpn_protocols = ["http/1.1"]
            drain_timeout = 10

            [parser]
            max_body_bytes = 1024
        "#})
        .unwrap();

        assert_eq!(config.connection_limit, 10_000);
        assert_eq!(config.connections_per_ip_limit, 4);
        assert_eq!(config.tls_handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.alpn_protocols, ["http/1.1"]);
        assert_eq!(config.drain_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.parser.max_body_bytes, 1024);
        assert_eq!(config.parser.max_header_bytes, 8192);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = ServerConfig::from_toml("connection_limt = 5\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let result = ServerConfig::from_toml("[parser]\nmax_headers = 5\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let result = ServerConfig::from_toml("tls_handshake_timeout = -1.0\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn validate_reports_every_problem() {
        let config = ServerConfig::default()
            .with_connection_limit(0)
            .with_tls_handshake_timeout(Duration::ZERO)
            .with_alpn_protocols([""]);

        let Err(ConfigError::Invalid { problems }) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("connection_limit"));
        assert!(problems[1].contains("tls_handshake_timeout"));
        assert!(problems[2].contains("alpn protocol"));
    }

    #[test]
    fn load_validates() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"connections_per_ip_limit = 0\n").unwrap();

        let result = ServerConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn load_missing_file() {
        let result = ServerConfig::load("/nonexistent/harbor.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
