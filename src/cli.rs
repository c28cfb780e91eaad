/// CLI Module
///
/// Command-line interface configuration using clap.
use std::path::PathBuf;

use clap::Parser;

/// Sales Analytics Service
///
/// Ingest delimited sales files into MySQL and serve revenue analytics
#[derive(Parser, Debug)]
#[command(name = "sales-analytics")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// HTTP port to listen on (overrides APP_PORT env var)
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Database connection URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Path to the sales CSV used by refresh and the cron trigger (overrides CSV_PATH)
    #[arg(long, value_name = "PATH")]
    pub csv_path: Option<PathBuf>,

    /// Rows per bulk upsert batch (clamped to [100, 5000])
    #[arg(short = 'b', long, value_name = "SIZE")]
    pub batch_size: Option<usize>,

    /// Capacity of the reader -> worker channel
    #[arg(long, value_name = "SIZE")]
    pub buffer_size: Option<usize>,

    /// Number of ingestion workers (0 selects from the CPU count)
    #[arg(short = 'w', long, value_name = "COUNT")]
    pub workers: Option<usize>,

    /// Cron expression for the scheduled refresh (overrides REFRESH_CRON)
    #[arg(long, value_name = "SPEC")]
    pub cron: Option<String>,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == Some(0) {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.buffer_size == Some(0) {
            anyhow::bail!("Buffer size must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            port: None,
            database_url: None,
            csv_path: None,
            batch_size: None,
            buffer_size: None,
            workers: None,
            cron: None,
        }
    }

    #[test]
    fn test_validation_accepts_defaults() {
        assert!(base_cli().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let cli = Cli { batch_size: Some(0), ..base_cli() };

        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_buffer_size() {
        let cli = Cli { buffer_size: Some(0), ..base_cli() };

        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_zero_workers_is_valid() {
        let cli = Cli { workers: Some(0), ..base_cli() };

        assert!(cli.validate().is_ok());
    }
}
