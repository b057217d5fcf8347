use std::env;
use std::str::FromStr;

use chrono::Duration;
use exec_signing_core::SigningSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{var} must be set when {reason}")]
    Missing {
        var: &'static str,
        reason: &'static str,
    },
}

/// Development-only signing secret, refused when a database is configured.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me-in-production";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host to bind to.
    pub host: String,
    /// Server port to bind to.
    pub port: u16,
    /// PostgreSQL connection URL. Without one the in-memory store is used.
    pub database_url: Option<String>,
    /// Maximum database connections in the pool.
    pub db_max_connections: u32,
    /// Minimum database connections in the pool.
    pub db_min_connections: u32,
    /// HS256 secret of the upstream identity provider.
    pub jwt_secret: String,
    /// Base of the signer portal that token links point at.
    pub portal_base_url: String,
    pub signature_token_ttl_days: i64,
    /// How often lapsed tokens are swept into `expired`.
    pub expiry_sweep_interval_secs: u64,
    /// Event bus channel capacity.
    pub event_bus_capacity: usize,
    /// Log level (e.g., "info", "debug", "trace").
    pub log_level: String,
    /// Root directory for stored artifacts.
    pub artifact_dir: String,
    /// URL prefix artifacts are addressed by.
    pub artifact_base_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());
        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        let jwt_secret = match lookup("JWT_SECRET").filter(|secret| !secret.is_empty()) {
            Some(secret) => secret,
            None if database_url.is_some() => {
                return Err(ConfigError::Missing {
                    var: "JWT_SECRET",
                    reason: "DATABASE_URL is set",
                })
            }
            None => DEV_JWT_SECRET.to_string(),
        };

        Ok(Self {
            host: text("HOST", "0.0.0.0"),
            port: parse_var(&lookup, "PORT", 3030)?,
            database_url,
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            db_min_connections: parse_var(&lookup, "DB_MIN_CONNECTIONS", 5)?,
            jwt_secret,
            portal_base_url: text("PORTAL_BASE_URL", "http://localhost:5173"),
            signature_token_ttl_days: parse_var(&lookup, "SIGNATURE_TOKEN_TTL_DAYS", 14)?,
            expiry_sweep_interval_secs: parse_var(&lookup, "EXPIRY_SWEEP_INTERVAL_SECS", 300)?,
            event_bus_capacity: parse_var(&lookup, "EVENT_BUS_CAPACITY", 1024)?,
            log_level: text("LOG_LEVEL", "info"),
            artifact_dir: text("ARTIFACT_DIR", "./artifacts"),
            artifact_base_url: text("ARTIFACT_BASE_URL", "artifact://local"),
        })
    }

    /// Build the socket address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn signing_settings(&self) -> SigningSettings {
        SigningSettings {
            portal_base_url: self.portal_base_url.clone(),
            token_ttl: Duration::days(self.signature_token_ttl_days),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            db_max_connections: 1,
            db_min_connections: 1,
            jwt_secret: "test-secret".to_string(),
            portal_base_url: "https://portal.test".to_string(),
            signature_token_ttl_days: 14,
            expiry_sweep_interval_secs: 300,
            event_bus_capacity: 16,
            log_level: "debug".to_string(),
            artifact_dir: "./artifacts".to_string(),
            artifact_base_url: "artifact://test".to_string(),
        }
    }
}
