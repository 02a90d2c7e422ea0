//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Broker credentials are referenced by env-var name in the config and
//! resolved at runtime into `SecretString`s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::types::BotError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// When true, orders are logged but never submitted.
    pub dry_run: bool,
    pub scan_interval_secs: u64,
    /// Append-only trade log written whenever a scan sells something.
    pub trade_history_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub username_env: String,
    pub password_env: String,
    #[serde(default)]
    pub mfa_code_env: Option<String>,
    #[serde(default)]
    pub device_token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.robinhood.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Credentials resolved from the environment.
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    pub mfa_code: Option<SecretString>,
    pub device_token: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BotError> {
        if self.bot.scan_interval_secs == 0 {
            return Err(BotError::Config("bot.scan_interval_secs must be > 0".into()));
        }
        if self.bot.trade_history_path.trim().is_empty() {
            return Err(BotError::Config("bot.trade_history_path is empty".into()));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve the broker login credentials referenced by the config.
    pub fn credentials(&self) -> Result<Credentials> {
        let optional = |name: &Option<String>| name.as_deref().and_then(|n| std::env::var(n).ok());
        Ok(Credentials {
            username: Self::resolve_env(&self.broker.username_env)?,
            password: SecretString::new(Self::resolve_env(&self.broker.password_env)?),
            mfa_code: optional(&self.broker.mfa_code_env).map(SecretString::new),
            device_token: optional(&self.broker.device_token_env),
        })
    }
}
