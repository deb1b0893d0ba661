use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use wallet_ledger::{DatabaseConfig, EngineConfig, StoreBackend};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Grace period for in-flight requests after a shutdown signal
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub backend: StoreBackend,
}

impl Config {
    /// Defaults → `CONFIG_FILE` or `config/{ENVIRONMENT}` → `WALLET_API__*` →
    /// `DATABASE_URL` / `PORT`
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = Self::defaults()?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // e.g. WALLET_API__LEDGER__BACKEND=memory
        builder = builder.add_source(
            Environment::with_prefix("WALLET_API")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let database = DatabaseConfig::default();

        config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.shutdown_timeout_secs", 5)?
            .set_default("ledger.backend", "postgres")?
            .set_default("database.url", database.url)?
            .set_default("database.max_connections", database.max_connections)?
            .set_default("database.min_connections", database.min_connections)?
            .set_default("database.acquire_timeout_secs", database.acquire_timeout_secs)?
            .set_default("database.run_migrations", database.run_migrations)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.ledger.backend == StoreBackend::Postgres && self.database.url.is_empty() {
            return Err("Database URL is required for the postgres backend".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("database.max_connections must be at least 1".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("database.min_connections exceeds database.max_connections".to_string());
        }

        if self.engine.operation_timeout_ms == Some(0) {
            return Err("engine.operation_timeout_ms must be positive when set".to_string());
        }

        Ok(())
    }
}
