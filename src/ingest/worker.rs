/// Ingestion Worker
///
/// Consumes raw records from the shared channel, decodes them, deduplicates
/// customers/products/orders within its own lifetime, and flushes per-entity
/// batches through multi-row upserts, each in its own transaction.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_channel::Receiver;
use sqlx::MySqlPool;
use tracing::{debug, error, info, warn};

use crate::ingest::decode::parse_row;
use crate::ingest::pipeline::IngestStats;
use crate::ingest::Sale;
use crate::models::{Customer, Order, OrderItem, Product};
use crate::repository::upsert;

pub(crate) struct Worker {
    pool: MySqlPool,
    job_id: String,
    worker_id: usize,
    batch_size: usize,
    stats: Arc<IngestStats>,
}

impl Worker {
    pub(crate) fn new(
        pool: MySqlPool,
        job_id: String,
        worker_id: usize,
        batch_size: usize,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self { pool, job_id, worker_id, batch_size, stats }
    }

    /// Process records until the channel is closed and drained, then flush
    /// any residual batches.
    pub(crate) async fn run(self, rows: Receiver<Vec<String>>) {
        let started = Instant::now();
        let mut processed: u64 = 0;
        let mut failed: u64 = 0;

        // dedupe maps live for the worker's lifetime; cross-worker
        // duplicates are resolved by the upsert
        let mut seen_customers: HashSet<String> = HashSet::with_capacity(self.batch_size * 2);
        let mut seen_products: HashSet<String> = HashSet::with_capacity(self.batch_size * 2);
        let mut seen_orders: HashSet<String> = HashSet::with_capacity(self.batch_size * 2);

        let mut customer_batch: Vec<Customer> = Vec::with_capacity(self.batch_size);
        let mut product_batch: Vec<Product> = Vec::with_capacity(self.batch_size);
        let mut order_batch: Vec<Sale> = Vec::with_capacity(self.batch_size);

        while let Ok(record) = rows.recv().await {
            let sale = match parse_row(&record) {
                Ok(sale) => sale,
                Err(e) => {
                    warn!(job_id = %self.job_id, error = %e, record = ?record, "failed to parse row");
                    failed += 1;
                    continue;
                }
            };

            if seen_customers.insert(sale.customer_id.clone()) {
                customer_batch.push(sale.to_customer());

                if customer_batch.len() >= self.batch_size {
                    let count = self.flush_customers(&mut customer_batch).await;
                    self.stats.customers.fetch_add(count, Ordering::Relaxed);
                }
            }

            if seen_products.insert(sale.product_id.clone()) {
                product_batch.push(sale.to_product());

                if product_batch.len() >= self.batch_size {
                    let count = self.flush_products(&mut product_batch).await;
                    self.stats.products.fetch_add(count, Ordering::Relaxed);
                }
            }

            // orders always join the batch: a repeated order id still carries
            // a distinct line item
            seen_orders.insert(sale.order_id.clone());
            order_batch.push(sale);

            if order_batch.len() >= self.batch_size {
                let (orders, items) = self.flush_orders(&mut order_batch).await;
                self.stats.orders.fetch_add(orders, Ordering::Relaxed);
                self.stats.items.fetch_add(items, Ordering::Relaxed);
            }

            processed += 1;

            if processed % 50_000 == 0 {
                debug!(
                    job_id = %self.job_id,
                    worker_id = self.worker_id,
                    processed_rows = processed,
                    failed_rows = failed,
                    elapsed = ?started.elapsed(),
                    "worker progress"
                );
            }
        }

        // channel closed: flush whatever is left
        let count = self.flush_customers(&mut customer_batch).await;
        self.stats.customers.fetch_add(count, Ordering::Relaxed);

        let count = self.flush_products(&mut product_batch).await;
        self.stats.products.fetch_add(count, Ordering::Relaxed);

        let (orders, items) = self.flush_orders(&mut order_batch).await;
        self.stats.orders.fetch_add(orders, Ordering::Relaxed);
        self.stats.items.fetch_add(items, Ordering::Relaxed);

        info!(
            job_id = %self.job_id,
            worker_id = self.worker_id,
            processed = processed,
            failed = failed,
            duration = ?started.elapsed(),
            "worker finished"
        );
    }

    /// Upsert a customer batch in one transaction; the batch is consumed
    /// whether or not the flush succeeds (no retry).
    async fn flush_customers(&self, batch: &mut Vec<Customer>) -> i64 {
        if batch.is_empty() {
            return 0;
        }

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, entity = "customer", error = %e, "failed to begin transaction");
                batch.clear();
                return 0;
            }
        };

        let affected = match upsert::bulk_upsert_customers(&mut tx, batch).await {
            Ok(n) => n,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, batch_size = batch.len(), error = %e, "failed to bulk upsert customers");
                batch.clear();
                return 0;
            }
        };

        if let Err(e) = tx.commit().await {
            error!(job_id = %self.job_id, worker_id = self.worker_id, error = %e, "failed to commit customer transaction");
            batch.clear();
            return 0;
        }

        debug!(job_id = %self.job_id, worker_id = self.worker_id, batch_size = batch.len(), affected = affected, "bulk upserted customers");

        batch.clear();
        affected as i64
    }

    /// Upsert a product batch in one transaction; same abandon-on-error
    /// semantics as customers.
    async fn flush_products(&self, batch: &mut Vec<Product>) -> i64 {
        if batch.is_empty() {
            return 0;
        }

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, entity = "product", error = %e, "failed to begin transaction");
                batch.clear();
                return 0;
            }
        };

        let affected = match upsert::bulk_upsert_products(&mut tx, batch).await {
            Ok(n) => n,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, batch_size = batch.len(), error = %e, "failed to bulk upsert products");
                batch.clear();
                return 0;
            }
        };

        if let Err(e) = tx.commit().await {
            error!(job_id = %self.job_id, worker_id = self.worker_id, error = %e, "failed to commit product transaction");
            batch.clear();
            return 0;
        }

        debug!(job_id = %self.job_id, worker_id = self.worker_id, batch_size = batch.len(), affected = affected, "bulk upserted products");

        batch.clear();
        affected as i64
    }

    /// Upsert the order headers and line items of a batch in ONE
    /// transaction, so an item is never committed without its order. The
    /// commit is only attempted when at least one sub-upsert made progress.
    async fn flush_orders(&self, batch: &mut Vec<Sale>) -> (i64, i64) {
        if batch.is_empty() {
            return (0, 0);
        }

        let (orders, items) = split_order_batch(batch);

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, entity = "order", error = %e, "failed to begin transaction");
                batch.clear();
                return (0, 0);
            }
        };

        let order_count = match upsert::bulk_upsert_orders(&mut tx, &orders).await {
            Ok(n) => n as i64,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, count = orders.len(), error = %e, "failed to bulk upsert orders");
                0
            }
        };

        let item_count = match upsert::bulk_upsert_order_items(&mut tx, &items).await {
            Ok(n) => n as i64,
            Err(e) => {
                error!(job_id = %self.job_id, worker_id = self.worker_id, count = items.len(), error = %e, "failed to bulk upsert order items");
                0
            }
        };

        batch.clear();

        if order_count > 0 || item_count > 0 {
            if let Err(e) = tx.commit().await {
                error!(job_id = %self.job_id, worker_id = self.worker_id, error = %e, "failed to commit order transaction");
                return (0, 0);
            }

            debug!(job_id = %self.job_id, worker_id = self.worker_id, orders = order_count, items = item_count, "bulk upserted orders and items");

            (order_count, item_count)
        } else {
            (0, 0)
        }
    }
}

/// Derive the order headers (unique by order id, last occurrence wins) and
/// the full line-item list (one item per record, never deduplicated) from a
/// batch of sales.
pub(crate) fn split_order_batch(sales: &[Sale]) -> (Vec<Order>, Vec<OrderItem>) {
    let mut order_index: HashMap<String, usize> = HashMap::with_capacity(sales.len());
    let mut orders: Vec<Order> = Vec::with_capacity(sales.len());
    let mut items: Vec<OrderItem> = Vec::with_capacity(sales.len());

    for sale in sales {
        let order = Order {
            id: sale.order_id.clone(),
            customer_id: sale.customer_id.clone(),
            order_date: sale.order_date,
            total_amount: sale.order_total,
        };

        match order_index.get(&sale.order_id) {
            Some(&i) => orders[i] = order,
            None => {
                order_index.insert(sale.order_id.clone(), orders.len());
                orders.push(order);
            }
        }

        items.push(OrderItem {
            order_id: sale.order_id.clone(),
            product_id: sale.product_id.clone(),
            quantity: sale.quantity,
            unit_price: sale.unit_price,
            discount: sale.discount,
            shipping_cost: sale.shipping,
        });
    }

    (orders, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sale(order_id: &str, product_id: &str, quantity: i32, unit_price: f64) -> Sale {
        Sale {
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            customer_id: "C1".to_string(),
            order_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            order_total: quantity as f64 * unit_price,
            product_name: "Widget".to_string(),
            product_category: "Tools".to_string(),
            unit_price,
            customer_name: "Alice".to_string(),
            customer_email: "a@x".to_string(),
            customer_address: "1 Main".to_string(),
            region: "NA".to_string(),
            quantity,
            discount: 0.0,
            shipping: 0.0,
        }
    }

    #[test]
    fn test_split_dedupes_orders_but_not_items() {
        let sales = vec![sale("O1", "P1", 1, 10.0), sale("O1", "P2", 2, 20.0), sale("O2", "P1", 3, 30.0)];

        let (orders, items) = split_order_batch(&sales);

        assert_eq!(orders.len(), 2);
        assert_eq!(items.len(), 3);
        assert_eq!(orders[0].id, "O1");
        assert_eq!(orders[1].id, "O2");
    }

    #[test]
    fn test_split_keeps_last_values_for_repeated_order() {
        let sales = vec![sale("O1", "P1", 1, 10.0), sale("O1", "P2", 4, 25.0)];

        let (orders, items) = split_order_batch(&sales);

        assert_eq!(orders.len(), 1);
        assert!((orders[0].total_amount - 100.0).abs() < 1e-9);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_id, "P1");
        assert_eq!(items[1].product_id, "P2");
    }

    #[test]
    fn test_split_keeps_repeated_product_lines() {
        // an order with the same product twice still yields two items
        let sales = vec![sale("O1", "P1", 1, 10.0), sale("O1", "P1", 2, 10.0)];

        let (orders, items) = split_order_batch(&sales);

        assert_eq!(orders.len(), 1);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_split_empty_batch() {
        let (orders, items) = split_order_batch(&[]);

        assert!(orders.is_empty());
        assert!(items.is_empty());
    }
}
