/// Configuration Module
///
/// Runtime configuration from environment variables (a `.env` file is
/// honored), with CLI flags taking precedence where provided.
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::cli::Cli;
use crate::ingest::{DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_DB_CONNECTIONS};

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port the API binds to
    pub port: u16,
    /// MySQL connection URL
    pub database_url: String,
    /// CSV consumed by refresh and the cron trigger
    pub csv_path: PathBuf,
    /// Cron expression for the scheduled refresh; unset disables it
    pub cron: Option<String>,
    /// Rows per bulk upsert batch
    pub batch_size: usize,
    /// Capacity of the reader -> worker channel
    pub buffer_size: usize,
    /// Ingestion worker count; 0 selects from the CPU count
    pub workers: usize,
    /// Size of the shared connection pool
    pub max_db_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL not found in environment. Please check your .env file")?;

        Ok(Self {
            port: env_or("APP_PORT", 8080)?,
            database_url,
            csv_path: PathBuf::from(env::var("CSV_PATH").unwrap_or_else(|_| "./data/sales.csv".to_string())),
            cron: env::var("REFRESH_CRON").ok().filter(|s| !s.is_empty()),
            batch_size: env_or("INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            buffer_size: env_or("INGEST_BUFFER_SIZE", DEFAULT_BUFFER_SIZE)?,
            workers: env_or("INGEST_WORKERS", 0)?,
            max_db_connections: env_or("MAX_DB_CONNECTIONS", DEFAULT_MAX_DB_CONNECTIONS)?,
        })
    }

    /// Overlay CLI flags onto the environment-derived configuration
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(ref url) = cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(ref path) = cli.csv_path {
            self.csv_path = path.clone();
        }
        if let Some(ref cron) = cli.cron {
            self.cron = Some(cron.clone());
        }
        if let Some(batch_size) = cli.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(buffer_size) = cli.buffer_size {
            self.buffer_size = buffer_size;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value.parse::<T>().map_err(|e| anyhow!("Invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("SALES_TEST_UNSET_VARIABLE", 42usize).unwrap(), 42);
    }

    #[test]
    fn test_env_or_parses_value() {
        env::set_var("SALES_TEST_BATCH", "123");
        assert_eq!(env_or("SALES_TEST_BATCH", 0usize).unwrap(), 123);
        env::remove_var("SALES_TEST_BATCH");
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("SALES_TEST_GARBAGE", "not-a-number");
        assert!(env_or("SALES_TEST_GARBAGE", 0usize).is_err());
        env::remove_var("SALES_TEST_GARBAGE");
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config {
            port: 8080,
            database_url: "mysql://app@localhost/sales".to_string(),
            csv_path: PathBuf::from("./data/sales.csv"),
            cron: None,
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: 0,
            max_db_connections: DEFAULT_MAX_DB_CONNECTIONS,
        };

        let cli = Cli {
            port: Some(9090),
            database_url: None,
            csv_path: Some(PathBuf::from("/tmp/other.csv")),
            batch_size: Some(500),
            buffer_size: None,
            workers: Some(4),
            cron: None,
        };

        config.apply_cli(&cli);

        assert_eq!(config.port, 9090);
        assert_eq!(config.database_url, "mysql://app@localhost/sales");
        assert_eq!(config.csv_path, PathBuf::from("/tmp/other.csv"));
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.workers, 4);
    }
}
