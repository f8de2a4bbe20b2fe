//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// Database configuration for the migration store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    /// `sslmode=require` in the connection URL
    pub ssl_required: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "shift".to_string(),
            max_pool_size: 10,
            ssl_required: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Workflow limits
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Alters allowed to run at once on one cluster
    pub parallel_run_limit: i64,
    /// Tables with at most this many rows may run short
    pub small_table_row_limit: i64,
    /// Migrations handed to the execution agent per poll
    pub unstage_limit: usize,
    pub sweep_interval_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            parallel_run_limit: 1,
            small_table_row_limit: 5000,
            unstage_limit: 2,
            sweep_interval_secs: 15,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    /// `None` runs the service on the in-memory store
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub workflow: WorkflowConfig,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: env_or("HOST", ServerConfig::default().host),
            port: env_or("PORT", ServerConfig::default().port),
        };

        // DATABASE_URL wins over the individual variables
        let database = if let Ok(database_url) = std::env::var("DATABASE_URL") {
            Some(Self::parse_database_url(&database_url)?)
        } else if let Ok(host) = std::env::var("DB_HOST") {
            let defaults = DatabaseConfig::default();
            Some(DatabaseConfig {
                host,
                port: env_or("DB_PORT", defaults.port),
                user: std::env::var("DB_USER").unwrap_or(defaults.user),
                password: std::env::var("DB_PASSWORD").unwrap_or_default(),
                database: std::env::var("DB_NAME").unwrap_or(defaults.database),
                max_pool_size: env_or("DB_MAX_CONNECTIONS", defaults.max_pool_size),
                ssl_required: false,
            })
        } else {
            None
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            parallel_run_limit: env_or("SHIFT_PARALLEL_RUN_LIMIT", defaults.parallel_run_limit),
            small_table_row_limit: env_or("SHIFT_SMALL_TABLE_ROW_LIMIT", defaults.small_table_row_limit),
            unstage_limit: env_or("SHIFT_UNSTAGE_LIMIT", defaults.unstage_limit),
            sweep_interval_secs: env_or("SHIFT_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
        };
        if workflow.parallel_run_limit < 1 {
            return Err(ConfigError::InvalidValue(
                "SHIFT_PARALLEL_RUN_LIMIT must be at least 1".to_string(),
            ));
        }
        if workflow.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SHIFT_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            server,
            database,
            cors,
            workflow,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue("Invalid DATABASE_URL format (expected postgresql://...)".to_string())
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let ssl_required = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database: parsed.path().trim_start_matches('/').to_string(),
            max_pool_size: env_or("DB_MAX_CONNECTIONS", 10),
            ssl_required,
        })
    }
}
