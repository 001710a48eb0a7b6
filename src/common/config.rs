//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// How DSS access tokens are obtained
    #[serde(default)]
    pub auth: AuthConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Limits for concurrent scenarios
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Token acquisition strategy
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Send no Authorization header
    #[default]
    None,
    /// Send the same bearer token for every scope
    StaticToken,
    /// Request tokens from an InterUSS dummy OAuth server
    DummyOauth,
}

/// Authentication settings
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub kind: AuthKind,

    /// Token for `static_token`
    #[serde(default)]
    pub token: Option<String>,

    /// Token endpoint for `dummy_oauth`, e.g. `http://localhost:8085/token`
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// Identity of the qualifier; expected as manager/owner of created entities
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Audience to request instead of the DSS host name
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            kind: AuthKind::default(),
            token: None,
            token_endpoint: None,
            subject: default_subject(),
            audience: None,
        }
    }
}

fn default_subject() -> String {
    "uss_qualifier".to_string()
}

/// HTTP client settings
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "dss-qualifier".to_string()
}

/// Concurrency limits
#[derive(Debug, Deserialize, Clone)]
pub struct ConcurrencyConfig {
    /// Maximum number of requests a concurrent step keeps in flight
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_in_flight() -> usize {
    20
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long secondary DSS instances get to converge after a write
    #[serde(default = "default_propagation")]
    pub propagation_secs: u64,

    /// Delay between two reads while waiting for convergence
    #[serde(default = "default_propagation_poll")]
    pub propagation_poll_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            propagation_secs: default_propagation(),
            propagation_poll_ms: default_propagation_poll(),
        }
    }
}

impl Timeouts {
    pub fn propagation(&self) -> Duration {
        Duration::from_secs(self.propagation_secs)
    }

    pub fn propagation_poll(&self) -> Duration {
        Duration::from_millis(self.propagation_poll_ms)
    }
}

fn default_propagation() -> u64 {
    5
}
fn default_propagation_poll() -> u64 {
    250
}

/// Log output settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Also write logs to `<data dir>/logs/qualifier.log`
    #[serde(default)]
    pub file: bool,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, e))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, from the default location otherwise
    pub fn load_or_default(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self.auth.kind {
            AuthKind::StaticToken if self.auth.token.is_none() => {
                return Err(super::Error::Config(
                    "auth.kind = \"static_token\" requires auth.token".to_string(),
                ));
            }
            AuthKind::DummyOauth if self.auth.token_endpoint.is_none() => {
                return Err(super::Error::Config(
                    "auth.kind = \"dummy_oauth\" requires auth.token_endpoint".to_string(),
                ));
            }
            _ => {}
        }
        if self.concurrency.max_in_flight == 0 {
            return Err(super::Error::Config(
                "concurrency.max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.auth.kind, AuthKind::None);
        assert_eq!(config.auth.subject, "uss_qualifier");
        assert_eq!(config.http.timeout_secs, 10);
        assert_eq!(config.concurrency.max_in_flight, 20);
        assert_eq!(config.timeouts.propagation(), Duration::from_secs(5));
        assert!(!config.logging.file);
    }

    #[test]
    fn test_dummy_oauth_requires_endpoint() {
        let err = Config::parse("[auth]\nkind = \"dummy_oauth\"\n").unwrap_err();
        assert!(err.to_string().contains("token_endpoint"));

        let config = Config::parse(
            "[auth]\nkind = \"dummy_oauth\"\ntoken_endpoint = \"http://localhost:8085/token\"\nsubject = \"uss1\"\n",
        )
        .unwrap();
        assert_eq!(config.auth.kind, AuthKind::DummyOauth);
        assert_eq!(config.auth.subject, "uss1");
    }

    #[test]
    fn test_zero_in_flight_is_rejected() {
        assert!(Config::parse("[concurrency]\nmax_in_flight = 0\n").is_err());
    }
}
