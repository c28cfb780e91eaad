/// HTTP Server Module
///
/// Thin API surface over the ingestion pipeline and the analytics queries:
/// upload/refresh kick off background ingestion jobs, status polls the job
/// tracker, revenue dispatches to one of the fixed aggregations.
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::ingest::{Mode, Pipeline};
use crate::repository::{AnalyticsRepository, JobRepository};

/// Uploads beyond this size are rejected outright
const MAX_UPLOAD_BYTES: usize = 1 << 30;

const DEFAULT_TOP_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobRepository,
    pub analytics: AnalyticsRepository,
    pub pipeline: Arc<Pipeline>,
}

/// Bind and serve the API until the process exits
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/ingestion/upload", post(upload))
        .route("/api/v1/ingestion/refresh", post(refresh))
        .route("/api/v1/ingestion/status/:id", get(job_status))
        .route("/api/v1/analytics/revenue", get(revenue))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Deserialize)]
struct IngestionParams {
    mode: Option<String>,
}

/// Accept a multipart CSV upload and ingest it in the background.
///
/// Append mode upserts with last-writer-wins on mutable attributes; a
/// re-uploaded file overwrites earlier values for the same keys.
async fn upload(
    State(state): State<AppState>,
    Query(params): Query<IngestionParams>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut content: Option<Bytes> = None;

    while let Some(field) =
        multipart.next_field().await.map_err(|e| anyhow!("failed to read multipart field: {e}"))?
    {
        if field.name() == Some("file") {
            content = Some(field.bytes().await.map_err(|e| anyhow!("failed to read file bytes: {e}"))?);
        }
    }

    let Some(content) = content else {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({ "error": "multipart field `file` is required" })))
            .into_response());
    };

    let mode = Mode::parse(params.mode.as_deref().unwrap_or("append"));
    let job_id = Uuid::new_v4().to_string();

    state.jobs.insert(&job_id).await;

    let pipeline = state.pipeline.clone();
    let background_job_id = job_id.clone();
    tokio::spawn(async move {
        pipeline.import_reader(Cursor::new(content), &background_job_id, mode, CancellationToken::new()).await;
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response())
}

/// Re-ingest the configured CSV path in the background
async fn refresh(State(state): State<AppState>, Query(params): Query<IngestionParams>) -> impl IntoResponse {
    let mode = Mode::parse(params.mode.as_deref().unwrap_or("append"));
    let job_id = Uuid::new_v4().to_string();

    info!(job_id = %job_id, mode = %mode, "manual refresh triggered");

    state.jobs.insert(&job_id).await;

    let pipeline = state.pipeline.clone();
    let background_job_id = job_id.clone();
    tokio::spawn(async move {
        if let Err(e) =
            pipeline.import_from_path(&background_job_id, mode, CancellationToken::new()).await
        {
            error!(job_id = %background_job_id, error = %e, "refresh failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "message": "Refresh started", "mode": mode.to_string() })),
    )
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    match state.jobs.get(&id).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => {
            Ok((StatusCode::NOT_FOUND, Json(json!({ "error": "job not found", "job_id": id }))).into_response())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RevenueParams {
    start_date: Option<String>,
    end_date: Option<String>,
    #[serde(rename = "type")]
    calculation: Option<String>,
    limit: Option<String>,
}

/// Unified endpoint for all revenue calculations, dispatched on `type`
async fn revenue(State(state): State<AppState>, Query(params): Query<RevenueParams>) -> Result<Response, ApiError> {
    let (start, end) = match date_range(&params) {
        Ok(range) => range,
        Err(e) => {
            return Ok((StatusCode::BAD_REQUEST, Json(json!({ "error": format!("invalid date: {e}") })))
                .into_response());
        }
    };

    let period = json!({ "start_date": start.to_string(), "end_date": end.to_string() });
    let calculation = params.calculation.as_deref().unwrap_or("total");

    let result = match calculation {
        "total" => {
            let revenue = state.analytics.total_revenue(start, end).await?;
            json!({ "calculation": "total_revenue", "result": revenue, "period": period })
        }
        "product" => {
            let products = state.analytics.revenue_by_product(start, end).await?;
            json!({
                "calculation": "revenue_by_product",
                "count": products.len(),
                "products": products,
                "period": period,
            })
        }
        "category" => {
            let categories = state.analytics.revenue_by_category(start, end).await?;
            json!({
                "calculation": "revenue_by_category",
                "count": categories.len(),
                "categories": categories,
                "period": period,
            })
        }
        "region" => {
            let regions = state.analytics.revenue_by_region(start, end).await?;
            json!({
                "calculation": "revenue_by_region",
                "count": regions.len(),
                "regions": regions,
                "period": period,
            })
        }
        "top_products" => {
            let limit = parse_limit(params.limit.as_deref());
            let products = state.analytics.top_products(start, end, limit).await?;
            json!({
                "calculation": "top_products",
                "count": products.len(),
                "limit": limit,
                "products": products,
                "period": period,
            })
        }
        _ => {
            return Ok((StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid calculation type" })))
                .into_response());
        }
    };

    Ok(Json(json!({ "success": true, "data": result })).into_response())
}

/// Resolve the requested date range; defaults to the last 365 days
fn date_range(params: &RevenueParams) -> Result<(NaiveDate, NaiveDate), chrono::ParseError> {
    let today = Utc::now().date_naive();

    let start = match params.start_date.as_deref() {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")?,
        None => today - Duration::days(365),
    };
    let end = match params.end_date.as_deref() {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")?,
        None => today,
    };

    Ok((start, end))
}

/// Parse the `limit` parameter; anything non-positive or unparseable falls
/// back to the default.
fn parse_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.parse::<i64>().ok()).filter(|n| *n > 0).unwrap_or(DEFAULT_TOP_LIMIT)
}

/// Adapter turning any internal error into a 500 JSON response
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");

        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(Some("3")), 3);
        assert_eq!(parse_limit(Some("0")), DEFAULT_TOP_LIMIT);
        assert_eq!(parse_limit(Some("-5")), DEFAULT_TOP_LIMIT);
        assert_eq!(parse_limit(Some("ten")), DEFAULT_TOP_LIMIT);
        assert_eq!(parse_limit(None), DEFAULT_TOP_LIMIT);
    }

    #[test]
    fn test_date_range_explicit() {
        let params = RevenueParams {
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2024-06-30".to_string()),
            ..Default::default()
        };

        let (start, end) = date_range(&params).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
    }

    #[test]
    fn test_date_range_defaults_to_last_year() {
        let (start, end) = date_range(&RevenueParams::default()).unwrap();

        assert_eq!(end, Utc::now().date_naive());
        assert_eq!(end - start, Duration::days(365));
    }

    #[test]
    fn test_date_range_rejects_bad_input() {
        let params = RevenueParams { start_date: Some("01/01/2024".to_string()), ..Default::default() };

        assert!(date_range(&params).is_err());
    }
}
