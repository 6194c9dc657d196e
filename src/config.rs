//! Service configuration
//!
//! Layered: built-in defaults, then an optional TOML file (`audit-chain.toml`
//! or the path in `AUDIT_CHAIN_CONFIG`), then `AUDIT_CHAIN_*` environment
//! variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::info;

use crate::error::{AuditError, AuditResult};

pub const DEFAULT_CONFIG_FILE: &str = "audit-chain.toml";
pub const CONFIG_PATH_ENV: &str = "AUDIT_CHAIN_CONFIG";
pub const ENV_PREFIX: &str = "AUDIT_CHAIN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub max_connections: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub verify_page_size: u32,
    pub append_retry_limit: u32,
    /// Seconds between scheduled verification passes; 0 disables them.
    pub verify_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://audit-chain.db?mode=rwc".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            max_connections: 5,
            default_page_size: 50,
            max_page_size: 500,
            verify_page_size: 500,
            append_retry_limit: 5,
            verify_interval_secs: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location and the environment.
    pub fn load() -> AuditResult<Self> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from `path` (if it exists) and the environment.
    pub fn load_from(path: &Path) -> AuditResult<Self> {
        let defaults = AppConfig::default();

        let config = Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("server_host", defaults.server_host)?
            .set_default("server_port", i64::from(defaults.server_port))?
            .set_default("max_connections", i64::from(defaults.max_connections))?
            .set_default("default_page_size", i64::from(defaults.default_page_size))?
            .set_default("max_page_size", i64::from(defaults.max_page_size))?
            .set_default("verify_page_size", i64::from(defaults.verify_page_size))?
            .set_default("append_retry_limit", i64::from(defaults.append_retry_limit))?
            .set_default("verify_interval_secs", defaults.verify_interval_secs as i64)?
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;

        info!("Configuration loaded (database: {})", app_config.database_url);
        Ok(app_config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> AuditResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(AuditError::ConfigError(
                "database_url must not be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(AuditError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if self.default_page_size == 0 || self.max_page_size == 0 || self.verify_page_size == 0 {
            return Err(AuditError::ConfigError(
                "page sizes must be at least 1".to_string(),
            ));
        }

        if self.default_page_size > self.max_page_size {
            return Err(AuditError::ConfigError(format!(
                "default_page_size ({}) > max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }

        if self.append_retry_limit == 0 {
            return Err(AuditError::ConfigError(
                "append_retry_limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
