//! Per-service configuration.
//!
//! Each adapter gets its own section; values come from an optional TOML file
//! layered under `DIRSYNC_`-prefixed environment variables.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration with one section per managed service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discourse: DiscourseConfig,
    #[serde(default)]
    pub phpbb: Phpbb3Config,
    #[serde(default)]
    pub teamspeak: Teamspeak3Config,
}

/// Discourse admin API access.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscourseConfig {
    /// Base URL of the forum, e.g. `https://forums.example.com`.
    pub base_url: String,
    /// Admin API key, sent as the `api_key` query parameter.
    pub api_key: String,
    /// Username the API key belongs to, sent as `api_username`.
    pub api_username: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DiscourseConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            api_username: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Direct database access to a phpBB3 forum.
#[derive(Debug, Clone, Deserialize)]
pub struct Phpbb3Config {
    /// MySQL connection URL for the forum database.
    pub database_url: String,
    /// Domain used to build the revoked-email sentinel (`revoked@<domain>`).
    pub domain: String,
    /// Avatar portrait URL template; `{id}` is replaced with the character id.
    #[serde(default = "default_portrait_url")]
    pub portrait_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for Phpbb3Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            domain: String::new(),
            portrait_url: default_portrait_url(),
            pool_size: default_pool_size(),
        }
    }
}

/// Teamspeak3 serverquery access.
#[derive(Debug, Clone, Deserialize)]
pub struct Teamspeak3Config {
    pub host: String,
    #[serde(default = "default_ts3_port")]
    pub port: u16,
    /// Serverquery login name.
    pub query_user: String,
    pub query_password: String,
    /// Virtual server instance to select after login.
    #[serde(default = "default_virtual_server")]
    pub virtual_server: u32,
    /// Nickname template; `{corp}` and `{name}` are substituted.
    #[serde(default = "default_nickname_pattern")]
    pub nickname_pattern: String,
}

impl Default for Teamspeak3Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ts3_port(),
            query_user: String::new(),
            query_password: String::new(),
            virtual_server: default_virtual_server(),
            nickname_pattern: default_nickname_pattern(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_portrait_url() -> String {
    "https://image.eveonline.com/Character/{id}_128.jpg".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_ts3_port() -> u16 {
    10011
}

fn default_virtual_server() -> u32 {
    1
}

fn default_nickname_pattern() -> String {
    "[{corp}] {name}".to_string()
}

impl Config {
    /// Load configuration from an optional file, then apply environment
    /// overrides (`DIRSYNC_DISCOURSE__API_KEY=...`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DIRSYNC")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot possibly work before any adapter is built.
    pub fn validate(&self) -> Result<()> {
        if !self.discourse.base_url.is_empty() {
            url::Url::parse(&self.discourse.base_url).map_err(|e| Error::InvalidInput {
                field: "discourse.base_url".to_string(),
                reason: e.to_string(),
            })?;
        }
        if !self.teamspeak.nickname_pattern.is_empty()
            && !self.teamspeak.nickname_pattern.contains("{name}")
        {
            return Err(Error::InvalidInput {
                field: "teamspeak.nickname_pattern".to_string(),
                reason: "pattern must contain {name}".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.teamspeak.port, 10011);
        assert_eq!(config.teamspeak.nickname_pattern, "[{corp}] {name}");
        assert!(config.phpbb.portrait_url.contains("{id}"));
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let config = Config {
            discourse: DiscourseConfig {
                base_url: "not a url".to_string(),
                ..DiscourseConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn nickname_pattern_must_reference_name() {
        let config = Config {
            teamspeak: Teamspeak3Config {
                nickname_pattern: "[{corp}]".to_string(),
                ..Teamspeak3Config::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
