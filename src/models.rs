/// Data Models Module
///
/// This module defines the persisted entity types produced by the ingestion
/// pipeline, the ingestion job record, and the row types returned by the
/// revenue analytics queries.
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Ingestion job status values
pub mod status {
    pub const RUNNING: &str = "running";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// A customer derived from the sales feed, keyed by its external id
#[derive(Debug, Clone)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub region: String,
    pub address: String,
}

/// A product derived from the sales feed, keyed by its external id
#[derive(Debug, Clone)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub unit_price: f64,
}

/// One order header; total_amount carries the computed order total
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub order_date: NaiveDate,
    pub total_amount: f64,
}

/// One order line, keyed by (order_id, product_id)
#[derive(Debug, Clone)]
pub struct OrderItem {
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub discount: f64,
    pub shipping_cost: f64,
}

/// Lifecycle record for one ingestion run
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IngestionJob {
    pub job_id: String,
    pub status: String,
    pub total_rows: i64,
    pub processed_rows: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProductRevenue {
    pub product_id: String,
    pub product_name: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CategoryRevenue {
    pub category: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RegionRevenue {
    pub region: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TopProduct {
    pub product_id: String,
    pub product_name: String,
    pub quantity_sold: i64,
    pub revenue: f64,
}
