//! Configuration loading and validation.
//!
//! A [`BridgeConfig`] can be loaded from a YAML file or, failing that, from
//! environment variables — mirroring the two loading paths the original
//! Python implementation exposed as `from_yaml`/`from_env`. CLI flags are
//! applied as a final override layer by the caller (see `main.rs`).

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

const MIN_TOKEN_LEN: usize = 10;
const DEFAULT_INTENTS: u32 = 513;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_LOG_LEVEL: &str = "info";

/// A single event-name-to-endpoints mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRoute {
    pub event_name: String,
    pub endpoints: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    #[serde(default = "default_intents")]
    pub intents: u32,
}

fn default_intents() -> u32 {
    DEFAULT_INTENTS
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_routes() -> Vec<EventRoute> {
    Vec::new()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<EventRoute>,
}

/// Fatal, user-visible errors produced while loading or validating config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("discord.token is required")]
    MissingToken,
    #[error("discord.token must be at least {MIN_TOKEN_LEN} characters (got {actual})")]
    TokenTooShort { actual: usize },
    #[error("route {route:?} has an invalid endpoint URL: {endpoint:?}")]
    InvalidEndpoint { route: String, endpoint: String },
    #[error("environment variable {0} is required when no config file is given")]
    MissingEnv(&'static str),
}

impl BridgeConfig {
    /// Load from a YAML file at `path`.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables. `DISCORD_TOKEN` is required; the
    /// rest fall back to their schema defaults. No routes are configured —
    /// operators using env-based config are expected to add routes later by
    /// switching to a YAML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("DISCORD_TOKEN")
            .map_err(|_| ConfigError::MissingEnv("DISCORD_TOKEN"))?;

        let intents = std::env::var("DISCORD_INTENTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INTENTS);

        let timeout = std::env::var("HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        let retry_attempts = std::env::var("HTTP_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);

        let retry_delay = std::env::var("HTTP_RETRY_DELAY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRY_DELAY_SECS);

        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let config = BridgeConfig {
            discord: DiscordConfig { token, intents },
            http: HttpConfig {
                timeout,
                retry_attempts,
                retry_delay,
            },
            logging: LoggingConfig { level },
            routes: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Overlay a config with CLI-provided overrides. `None` fields leave the
    /// loaded value untouched.
    pub fn apply_overrides(&mut self, token: Option<String>, log_level: Option<String>) {
        if let Some(token) = token {
            self.discord.token = token;
        }
        if let Some(level) = log_level {
            self.logging.level = level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.discord.token.len() < MIN_TOKEN_LEN {
            return Err(ConfigError::TokenTooShort {
                actual: self.discord.token.len(),
            });
        }
        for route in &self.routes {
            for endpoint in &route.endpoints {
                if Url::parse(endpoint).is_err() {
                    return Err(ConfigError::InvalidEndpoint {
                        route: route.event_name.clone(),
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Routes matching `event_name`, enabled only, in definition order.
    pub fn routes_for_event(&self, event_name: &str) -> Vec<&EventRoute> {
        self.routes
            .iter()
            .filter(|r| r.enabled && r.event_name == event_name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> BridgeConfig {
        BridgeConfig {
            discord: DiscordConfig {
                token: "0123456789abcdef".to_string(),
                intents: DEFAULT_INTENTS,
            },
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            routes: vec![
                EventRoute {
                    event_name: "MESSAGE_CREATE".to_string(),
                    endpoints: vec!["https://example.com/a".to_string()],
                    enabled: true,
                },
                EventRoute {
                    event_name: "MESSAGE_CREATE".to_string(),
                    endpoints: vec!["https://example.com/b".to_string()],
                    enabled: false,
                },
                EventRoute {
                    event_name: "MESSAGE_DELETE".to_string(),
                    endpoints: vec!["https://example.com/c".to_string()],
                    enabled: true,
                },
            ],
        }
    }

    #[test]
    fn routes_for_event_skips_disabled_and_preserves_order() {
        let config = minimal_config();
        let matched = config.routes_for_event("MESSAGE_CREATE");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].endpoints[0], "https://example.com/a");
    }

    #[test]
    fn routes_for_event_empty_when_no_match() {
        let config = minimal_config();
        assert!(config.routes_for_event("GUILD_CREATE").is_empty());
    }

    #[test]
    fn validate_rejects_short_token() {
        let mut config = minimal_config();
        config.discord.token = "short".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TokenTooShort { .. })
        ));
    }

    #[test]
    fn validate_rejects_malformed_endpoint() {
        let mut config = minimal_config();
        config.routes.push(EventRoute {
            event_name: "X".to_string(),
            endpoints: vec!["not-a-url".to_string()],
            enabled: true,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn from_yaml_parses_full_schema() {
        let dir = std::env::temp_dir().join(format!(
            "discord-bridge-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            r#"
discord:
  token: "0123456789abcdef"
http:
  timeout: 15
  retry_attempts: 5
  retry_delay: 2
routes:
  - event_name: MESSAGE_CREATE
    endpoints:
      - https://example.com/hook
"#,
        )
        .unwrap();

        let config = BridgeConfig::from_yaml(&path).unwrap();
        assert_eq!(config.http.timeout, 15);
        assert_eq!(config.http.retry_attempts, 5);
        assert_eq!(config.routes.len(), 1);
        assert!(config.routes[0].enabled);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn apply_overrides_replaces_only_given_fields() {
        let mut config = minimal_config();
        config.apply_overrides(None, Some("debug".to_string()));
        assert_eq!(config.discord.token, "0123456789abcdef");
        assert_eq!(config.logging.level, "debug");
    }
}
