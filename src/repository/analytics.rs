/// Analytics Repository
///
/// Read-only revenue aggregations over an inclusive order-date range.
/// Line-item revenue is `quantity * (unit_price * (1 - discount)) +
/// shipping_cost`; NULL aggregates surface as 0.
use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::MySqlPool;

use crate::models::{CategoryRevenue, ProductRevenue, RegionRevenue, TopProduct};

#[derive(Clone)]
pub struct AnalyticsRepository {
    pool: MySqlPool,
}

impl AnalyticsRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn total_revenue(&self, start: NaiveDate, end: NaiveDate) -> Result<f64> {
        let revenue = sqlx::query_scalar::<_, Option<f64>>(
            "select sum(oi.quantity * (oi.unit_price * (1 - oi.discount)) + oi.shipping_cost) \
             from order_items oi \
             join orders o on o.id = oi.order_id \
             where o.order_date between ? and ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .context("Failed to get total revenue")?;

        Ok(revenue.unwrap_or(0.0))
    }

    pub async fn revenue_by_product(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ProductRevenue>> {
        sqlx::query_as::<_, ProductRevenue>(
            "select p.id as product_id, p.name as product_name, \
             sum(oi.quantity * (oi.unit_price * (1 - oi.discount)) + oi.shipping_cost) as revenue \
             from order_items oi \
             join orders o on o.id = oi.order_id \
             join products p on p.id = oi.product_id \
             where o.order_date between ? and ? \
             group by p.id, p.name \
             order by revenue desc",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get revenue by product")
    }

    pub async fn revenue_by_category(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CategoryRevenue>> {
        sqlx::query_as::<_, CategoryRevenue>(
            "select p.category as category, \
             sum(oi.quantity * (oi.unit_price * (1 - oi.discount)) + oi.shipping_cost) as revenue \
             from order_items oi \
             join orders o on o.id = oi.order_id \
             join products p on p.id = oi.product_id \
             where o.order_date between ? and ? \
             group by p.category \
             order by revenue desc",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get revenue by category")
    }

    pub async fn revenue_by_region(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RegionRevenue>> {
        sqlx::query_as::<_, RegionRevenue>(
            "select c.region as region, \
             sum(oi.quantity * (oi.unit_price * (1 - oi.discount)) + oi.shipping_cost) as revenue \
             from order_items oi \
             join orders o on o.id = oi.order_id \
             join customers c on c.id = o.customer_id \
             where o.order_date between ? and ? \
             group by c.region \
             order by revenue desc",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get revenue by region")
    }

    /// Top products by unit volume, at most `limit` rows
    pub async fn top_products(&self, start: NaiveDate, end: NaiveDate, limit: i64) -> Result<Vec<TopProduct>> {
        sqlx::query_as::<_, TopProduct>(
            "select p.id as product_id, p.name as product_name, \
             cast(sum(oi.quantity) as signed) as quantity_sold, \
             sum(oi.quantity * (oi.unit_price * (1 - oi.discount)) + oi.shipping_cost) as revenue \
             from order_items oi \
             join orders o on o.id = oi.order_id \
             join products p on p.id = oi.product_id \
             where o.order_date between ? and ? \
             group by p.id, p.name \
             order by quantity_sold desc \
             limit ?",
        )
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get top products")
    }

    /// Distinct customers with at least one order in the range
    pub async fn customer_count(&self, start: NaiveDate, end: NaiveDate) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "select count(distinct o.customer_id) from orders o where o.order_date between ? and ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .context("Failed to get customer count")
    }

    pub async fn order_count(&self, start: NaiveDate, end: NaiveDate) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("select count(*) from orders o where o.order_date between ? and ?")
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await
            .context("Failed to get order count")
    }

    /// Mean of the persisted order totals in the range
    pub async fn average_order_value(&self, start: NaiveDate, end: NaiveDate) -> Result<f64> {
        let avg = sqlx::query_scalar::<_, Option<f64>>(
            "select avg(total_amount) from orders o where o.order_date between ? and ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .context("Failed to get average order value")?;

        Ok(avg.unwrap_or(0.0))
    }
}
