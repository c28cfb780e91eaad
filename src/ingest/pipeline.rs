/// Pipeline Module
///
/// Orchestrates one ingestion run: database session tuning, optional table
/// truncation, reader + worker fan-out over a bounded channel, periodic
/// progress reporting, and job completion, with the session restored on
/// every exit path after tuning succeeded.
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::{Database, BULK_SESSION_SETTINGS, RESTORE_SESSION_SETTINGS};
use crate::ingest::{
    reader, worker::Worker, DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_DB_CONNECTIONS, MAX_BATCH_SIZE,
    MIN_BATCH_SIZE,
};
use crate::repository::JobRepository;

/// Tables cleared in overwrite mode, in reverse dependency order
const TRUNCATE_ORDER: [&str; 4] = ["order_items", "orders", "products", "customers"];

/// How a run treats existing table contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Upsert on top of whatever is already persisted
    #[default]
    Append,
    /// Truncate all entity tables before ingesting
    Overwrite,
}

impl Mode {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("overwrite") {
            Mode::Overwrite
        } else {
            Mode::Append
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Append => write!(f, "append"),
            Mode::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Shared per-run counters, updated with atomic adds from the reader and
/// every worker.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub rows: AtomicI64,
    pub customers: AtomicI64,
    pub products: AtomicI64,
    pub orders: AtomicI64,
    pub items: AtomicI64,
}

impl IngestStats {
    pub fn rows(&self) -> i64 {
        self.rows.load(Ordering::Relaxed)
    }
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// CSV consumed by path-based imports (refresh, cron)
    pub csv_path: PathBuf,
    /// Rows per bulk upsert batch, clamped to [100, 5000]
    pub batch_size: usize,
    /// Capacity of the reader -> worker channel
    pub buffer_size: usize,
    /// Worker count; 0 selects from the CPU count and pool size
    pub workers: usize,
    /// Size of the shared connection pool
    pub max_db_connections: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("./data/sales.csv"),
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: 0,
            max_db_connections: DEFAULT_MAX_DB_CONNECTIONS,
        }
    }
}

/// Main ingestion pipeline
pub struct Pipeline {
    db: Database,
    jobs: JobRepository,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline instance; the configured batch size is clamped
    /// here so every worker sees a safe value.
    pub fn new(db: Database, jobs: JobRepository, mut config: PipelineConfig) -> Self {
        config.batch_size = clamp_batch_size(config.batch_size);
        Self { db, jobs, config }
    }

    /// Ingest the configured CSV path
    pub async fn import_from_path(&self, job_id: &str, mode: Mode, cancel: CancellationToken) -> Result<()> {
        let started = Instant::now();
        info!(job_id = %job_id, path = %self.config.csv_path.display(), mode = %mode, "starting import from path");

        let file = match File::open(&self.config.csv_path) {
            Ok(file) => file,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to open csv file");
                self.jobs.set_failed(job_id, &format!("failed to open csv file: {e}")).await;
                return Err(e).context("Failed to open csv file");
            }
        };

        self.process(file, job_id, mode, cancel).await;

        info!(job_id = %job_id, total_duration = ?started.elapsed(), "import completed");
        Ok(())
    }

    /// Ingest from any byte source (typically an uploaded file)
    pub async fn import_reader<R>(&self, input: R, job_id: &str, mode: Mode, cancel: CancellationToken)
    where
        R: Read + Send + 'static,
    {
        let started = Instant::now();
        info!(job_id = %job_id, mode = %mode, "starting import from file upload");

        self.process(input, job_id, mode, cancel).await;

        info!(job_id = %job_id, total_duration = ?started.elapsed(), "import completed");
    }

    /// Run the full ingestion workflow for one job. The session restore runs
    /// on every path once tuning succeeded, including aborts.
    async fn process<R>(&self, input: R, job_id: &str, mode: Mode, cancel: CancellationToken)
    where
        R: Read + Send + 'static,
    {
        info!(job_id = %job_id, mode = %mode, "ingest start");

        if self.tune_session(job_id).await.is_err() {
            return;
        }

        self.run(input, job_id, mode, cancel).await;

        self.restore_session(job_id).await;
    }

    async fn run<R>(&self, input: R, job_id: &str, mode: Mode, cancel: CancellationToken)
    where
        R: Read + Send + 'static,
    {
        let started = Instant::now();

        if mode == Mode::Overwrite && self.truncate_tables(job_id).await.is_err() {
            return;
        }

        let worker_count =
            effective_worker_count(self.config.workers, num_cpus::get(), self.config.max_db_connections);

        info!(
            job_id = %job_id,
            batch_size = self.config.batch_size,
            buffer_size = self.config.buffer_size,
            workers = worker_count,
            max_db_connections = self.config.max_db_connections,
            "starting csv ingestion"
        );

        let stats = Arc::new(IngestStats::default());
        let (raw_tx, raw_rx) = async_channel::bounded::<Vec<String>>(self.config.buffer_size);

        let mut workers = JoinSet::new();
        for worker_id in 1..=worker_count {
            let worker = Worker::new(
                self.db.pool().clone(),
                job_id.to_string(),
                worker_id,
                self.config.batch_size,
                stats.clone(),
            );
            workers.spawn(worker.run(raw_rx.clone()));
        }
        drop(raw_rx);

        // the reader owns the only sender; dropping it on exit closes the
        // channel and drains the workers
        {
            let jobs = self.jobs.clone();
            let stats = stats.clone();
            let cancel = cancel.clone();
            let job_id = job_id.to_string();
            tokio::spawn(async move {
                reader::read_records(input, raw_tx, &jobs, &job_id, &stats, &cancel).await;
            });
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + Duration::from_secs(2),
            Duration::from_secs(2),
        );
        let mut last_rows: i64 = 0;
        let mut last_tick = Instant::now();

        let drain = async {
            while workers.join_next().await.is_some() {}
        };
        tokio::pin!(drain);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let rows = stats.rows();
                    let rate = (rows - last_rows) as f64 / last_tick.elapsed().as_secs_f64();

                    self.jobs.bump(job_id, rows).await;
                    info!(
                        job_id = %job_id,
                        rows = rows,
                        customers = stats.customers.load(Ordering::Relaxed),
                        products = stats.products.load(Ordering::Relaxed),
                        orders = stats.orders.load(Ordering::Relaxed),
                        items = stats.items.load(Ordering::Relaxed),
                        rows_per_second = rate,
                        elapsed = ?started.elapsed(),
                        "ingestion progress"
                    );

                    last_rows = rows;
                    last_tick = Instant::now();
                }
                _ = &mut drain => break,
            }
        }

        self.jobs.set_completed(job_id, stats.rows()).await;

        let duration = started.elapsed();
        info!(
            job_id = %job_id,
            rows = stats.rows(),
            customers = stats.customers.load(Ordering::Relaxed),
            products = stats.products.load(Ordering::Relaxed),
            orders = stats.orders.load(Ordering::Relaxed),
            items = stats.items.load(Ordering::Relaxed),
            duration = ?duration,
            rows_per_sec = stats.rows() as f64 / duration.as_secs_f64(),
            "ingest done"
        );
    }

    /// Relax session checks for bulk loading; any failure aborts the job.
    async fn tune_session(&self, job_id: &str) -> Result<()> {
        self.db.set_bulk_mode(true);

        for stmt in BULK_SESSION_SETTINGS.iter().copied() {
            if let Err(e) = sqlx::query(stmt).execute(self.db.pool()).await {
                error!(job_id = %job_id, statement = stmt, error = %e, "failed to set bulk load session option");
                self.jobs.set_failed(job_id, &format!("failed to optimize database session: {e}")).await;
                self.db.set_bulk_mode(false);
                return Err(e).context("Failed to tune database session");
            }
        }

        info!(job_id = %job_id, "database session tuned for bulk loading");
        Ok(())
    }

    /// Restore default session settings; failures here are logged, not fatal.
    async fn restore_session(&self, job_id: &str) {
        self.db.set_bulk_mode(false);

        for stmt in RESTORE_SESSION_SETTINGS.iter().copied() {
            if let Err(e) = sqlx::query(stmt).execute(self.db.pool()).await {
                warn!(job_id = %job_id, statement = stmt, error = %e, "failed to restore session option");
            }
        }

        info!(job_id = %job_id, "database session settings restored");
    }

    /// Clear all entity tables for overwrite mode
    async fn truncate_tables(&self, job_id: &str) -> Result<()> {
        info!(job_id = %job_id, "truncating tables for overwrite mode");

        for table in TRUNCATE_ORDER {
            if let Err(e) = sqlx::query(&format!("truncate table {table}")).execute(self.db.pool()).await {
                error!(job_id = %job_id, table = table, error = %e, "failed to truncate table");
                self.jobs.set_failed(job_id, &format!("failed to truncate table {table}: {e}")).await;
                return Err(e).context("Failed to truncate tables");
            }
        }

        Ok(())
    }
}

/// Clamp the configured batch size into its safe operating range. Larger
/// batches amortize transaction overhead; the ceiling bounds statement size
/// and lock hold time.
pub(crate) fn clamp_batch_size(requested: usize) -> usize {
    requested.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

/// Pick the worker count: the configured value when positive, otherwise the
/// CPU count (minus one on larger machines, leaving a core for the OS)
/// capped at a third of the connection pool.
pub(crate) fn effective_worker_count(configured: usize, cpu_count: usize, max_db_connections: u32) -> usize {
    if configured > 0 {
        return configured;
    }

    let mut count = cpu_count;
    if count > 4 {
        count -= 1;
    }

    let max_workers = (max_db_connections / 3) as usize;
    if max_workers > 0 && count > max_workers {
        count = max_workers;
    }

    count.max(1)
}
