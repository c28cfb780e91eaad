/// Sales Analytics Service
///
/// Streaming ingestion of delimited sales files into MySQL plus aggregated
/// revenue analytics over the persisted entities.
mod cli;
mod config;
mod db;
mod ingest;
mod models;
mod repository;
mod scheduler;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;
use config::Config;
use db::Database;
use ingest::{Pipeline, PipelineConfig};
use repository::{AnalyticsRepository, JobRepository};
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate().context("Invalid command line arguments")?;

    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.apply_cli(&cli);

    println!("🚀 Starting Sales Analytics Service...");

    // Initialize database connection
    println!("💾 Connecting to MySQL database...");
    let database = Database::new(&config.database_url, config.max_db_connections)
        .await
        .context("Failed to connect to MySQL database")?;

    database.test_connection().await.context("Database connection test failed")?;

    println!("✅ Database connected successfully!");

    // Run database migrations
    database.migrate().await.context("Failed to run database migrations")?;

    println!("✅ Database schema is up to date!");

    let jobs = JobRepository::new(database.pool().clone());
    let analytics = AnalyticsRepository::new(database.pool().clone());

    let pipeline = Arc::new(Pipeline::new(
        database.clone(),
        jobs.clone(),
        PipelineConfig {
            csv_path: config.csv_path.clone(),
            batch_size: config.batch_size,
            buffer_size: config.buffer_size,
            workers: config.workers,
            max_db_connections: config.max_db_connections,
        },
    ));

    let state = AppState { jobs, analytics, pipeline };

    // Keep the scheduler handle alive for the lifetime of the process
    let _scheduler = scheduler::maybe_start_scheduler(&config, state.clone()).await?;

    tracing::info!("Sales analytics service initialized");

    server::serve(&config, state).await
}
