/// Bulk Upsert Repository
///
/// Builds one parameterized multi-row `insert ... on duplicate key update`
/// statement per entity batch and executes it on the caller's transaction.
/// The affected-row count is the engine's own report (MySQL counts an
/// updated row twice), useful as a progress signal only.
use anyhow::Result;
use sqlx::{MySql, Transaction};

use crate::models::{Customer, Order, OrderItem, Product};

/// Repeat `tuple` `rows` times, comma separated
fn multi_row_values(tuple: &str, rows: usize) -> String {
    let mut values = String::with_capacity(rows * (tuple.len() + 2));
    for i in 0..rows {
        if i > 0 {
            values.push_str(", ");
        }
        values.push_str(tuple);
    }
    values
}

/// Customer upsert; email is written on insert only.
pub(crate) fn customer_upsert_sql(rows: usize) -> String {
    format!(
        "insert into customers(id, name, email, region, address) values {} \
         on duplicate key update name=values(name), region=values(region), address=values(address)",
        multi_row_values("(?, ?, ?, ?, ?)", rows)
    )
}

pub(crate) fn product_upsert_sql(rows: usize) -> String {
    format!(
        "insert into products(id, name, category, unit_price) values {} \
         on duplicate key update name=values(name), category=values(category), unit_price=values(unit_price)",
        multi_row_values("(?, ?, ?, ?)", rows)
    )
}

pub(crate) fn order_upsert_sql(rows: usize) -> String {
    format!(
        "insert into orders(id, customer_id, order_date, total_amount) values {} \
         on duplicate key update customer_id=values(customer_id), order_date=values(order_date), \
         total_amount=values(total_amount)",
        multi_row_values("(?, ?, ?, ?)", rows)
    )
}

pub(crate) fn order_item_upsert_sql(rows: usize) -> String {
    format!(
        "insert into order_items(order_id, product_id, quantity, unit_price, discount, shipping_cost) values {} \
         on duplicate key update quantity=values(quantity), unit_price=values(unit_price), \
         discount=values(discount), shipping_cost=values(shipping_cost)",
        multi_row_values("(?, ?, ?, ?, ?, ?)", rows)
    )
}

pub async fn bulk_upsert_customers(tx: &mut Transaction<'_, MySql>, customers: &[Customer]) -> Result<u64> {
    if customers.is_empty() {
        return Ok(0);
    }

    let sql = customer_upsert_sql(customers.len());
    let mut query = sqlx::query(&sql);
    for c in customers {
        query = query.bind(&c.id).bind(&c.name).bind(&c.email).bind(&c.region).bind(&c.address);
    }

    let result = query.execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

pub async fn bulk_upsert_products(tx: &mut Transaction<'_, MySql>, products: &[Product]) -> Result<u64> {
    if products.is_empty() {
        return Ok(0);
    }

    let sql = product_upsert_sql(products.len());
    let mut query = sqlx::query(&sql);
    for p in products {
        query = query.bind(&p.id).bind(&p.name).bind(&p.category).bind(p.unit_price);
    }

    let result = query.execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

pub async fn bulk_upsert_orders(tx: &mut Transaction<'_, MySql>, orders: &[Order]) -> Result<u64> {
    if orders.is_empty() {
        return Ok(0);
    }

    let sql = order_upsert_sql(orders.len());
    let mut query = sqlx::query(&sql);
    for o in orders {
        query = query.bind(&o.id).bind(&o.customer_id).bind(o.order_date).bind(o.total_amount);
    }

    let result = query.execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

pub async fn bulk_upsert_order_items(tx: &mut Transaction<'_, MySql>, items: &[OrderItem]) -> Result<u64> {
    if items.is_empty() {
        return Ok(0);
    }

    let sql = order_item_upsert_sql(items.len());
    let mut query = sqlx::query(&sql);
    for item in items {
        query = query
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount)
            .bind(item.shipping_cost);
    }

    let result = query.execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder_count(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_customer_statement_shape() {
        let sql = customer_upsert_sql(3);

        assert!(sql.starts_with("insert into customers(id, name, email, region, address) values "));
        assert!(sql.contains("(?, ?, ?, ?, ?), (?, ?, ?, ?, ?), (?, ?, ?, ?, ?)"));
        assert_eq!(placeholder_count(&sql), 3 * 5);
    }

    #[test]
    fn test_customer_update_does_not_touch_email() {
        let sql = customer_upsert_sql(1);

        assert!(sql.contains("on duplicate key update"));
        assert!(sql.contains("name=values(name)"));
        assert!(sql.contains("region=values(region)"));
        assert!(sql.contains("address=values(address)"));
        assert!(!sql.contains("email=values(email)"));
    }

    #[test]
    fn test_product_statement_shape() {
        let sql = product_upsert_sql(2);

        assert_eq!(placeholder_count(&sql), 2 * 4);
        assert!(sql.contains("unit_price=values(unit_price)"));
    }

    #[test]
    fn test_order_statement_shape() {
        let sql = order_upsert_sql(4);

        assert_eq!(placeholder_count(&sql), 4 * 4);
        assert!(sql.contains("customer_id=values(customer_id)"));
        assert!(sql.contains("total_amount=values(total_amount)"));
    }

    #[test]
    fn test_order_item_statement_shape() {
        let sql = order_item_upsert_sql(2);

        assert_eq!(placeholder_count(&sql), 2 * 6);
        assert!(sql.contains("insert into order_items(order_id, product_id, quantity, unit_price, discount, shipping_cost)"));
        assert!(sql.contains("shipping_cost=values(shipping_cost)"));
    }

    #[test]
    fn test_single_row_has_no_separator() {
        assert_eq!(multi_row_values("(?)", 1), "(?)");
        assert_eq!(multi_row_values("(?)", 3), "(?), (?), (?)");
    }
}
