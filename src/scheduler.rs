/// Scheduler Module
///
/// Optional cron-driven refresh: when a cron expression is configured, the
/// scheduler periodically re-ingests the configured CSV path in append mode.
use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::ingest::Mode;
use crate::server::AppState;

/// Start the refresh scheduler when a cron expression is configured.
///
/// The returned scheduler must be kept alive for the lifetime of the
/// process.
pub async fn maybe_start_scheduler(config: &Config, state: AppState) -> Result<Option<JobScheduler>> {
    let Some(expr) = config.cron.clone() else {
        info!("no refresh cron configured, scheduler disabled");
        return Ok(None);
    };

    let scheduler = JobScheduler::new().await.context("Failed to create job scheduler")?;

    let job = Job::new_async(expr.as_str(), move |_uuid, _lock| {
        let state = state.clone();
        Box::pin(async move {
            let job_id = Uuid::new_v4().to_string();
            info!(job_id = %job_id, "starting scheduled csv import");

            state.jobs.insert(&job_id).await;

            if let Err(e) =
                state.pipeline.import_from_path(&job_id, Mode::Append, CancellationToken::new()).await
            {
                error!(job_id = %job_id, error = %e, "scheduled csv import failed");
                return;
            }

            info!(job_id = %job_id, "scheduled csv import completed");
        })
    })
    .with_context(|| format!("Invalid refresh cron expression: {expr}"))?;

    scheduler.add(job).await.context("Failed to add scheduled import job")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    info!(cron = %expr, "scheduled refresh enabled");
    Ok(Some(scheduler))
}
