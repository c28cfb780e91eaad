/// Row Decoder
///
/// Converts one raw CSV record into a typed `Sale` value. Field positions
/// are fixed by the feed format; field 11 is unused.
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{Customer, Product};

/// Minimum number of fields a sales record must carry
pub(crate) const MIN_FIELDS: usize = 15;

/// A single decoded sales record, denormalized across customer, product,
/// order, and line-item attributes.
#[derive(Debug, Clone)]
pub struct Sale {
    // identifiers
    pub order_id: String,
    pub product_id: String,
    pub customer_id: String,

    // order info
    pub order_date: NaiveDate,
    pub order_total: f64,

    // product info
    pub product_name: String,
    pub product_category: String,
    pub unit_price: f64,

    // customer info
    pub customer_name: String,
    pub customer_email: String,
    pub customer_address: String,
    pub region: String,

    // item details
    pub quantity: i32,
    pub discount: f64,
    pub shipping: f64,
}

impl Sale {
    /// Project the customer attributes of this sale
    pub fn to_customer(&self) -> Customer {
        Customer {
            id: self.customer_id.clone(),
            name: self.customer_name.clone(),
            email: self.customer_email.clone(),
            region: self.region.clone(),
            address: self.customer_address.clone(),
        }
    }

    /// Project the product attributes of this sale
    pub fn to_product(&self) -> Product {
        Product {
            id: self.product_id.clone(),
            name: self.product_name.clone(),
            category: self.product_category.clone(),
            unit_price: self.unit_price,
        }
    }
}

/// Why a record could not be decoded into a `Sale`
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row has {0} fields, expected at least {1}")]
    TooFewFields(usize, usize),
    #[error("invalid quantity: {0}")]
    Quantity(std::num::ParseIntError),
    #[error("invalid price: {0}")]
    Price(std::num::ParseFloatError),
    #[error("invalid discount: {0}")]
    Discount(std::num::ParseFloatError),
    #[error("invalid shipping: {0}")]
    Shipping(std::num::ParseFloatError),
    #[error("invalid date: {0}")]
    Date(chrono::ParseError),
}

/// Decode one CSV record into a `Sale`.
///
/// The order total is computed here so every downstream consumer sees the
/// same value: `quantity * unit_price * (1 - discount) + shipping`.
pub fn parse_row(record: &[String]) -> Result<Sale, RowError> {
    if record.len() < MIN_FIELDS {
        return Err(RowError::TooFewFields(record.len(), MIN_FIELDS));
    }

    let quantity: i32 = record[7].parse().map_err(RowError::Quantity)?;
    let unit_price: f64 = record[8].parse().map_err(RowError::Price)?;
    let discount: f64 = record[9].parse().map_err(RowError::Discount)?;
    let shipping: f64 = record[10].parse().map_err(RowError::Shipping)?;
    let order_date = NaiveDate::parse_from_str(&record[6], "%Y-%m-%d").map_err(RowError::Date)?;

    let order_total = quantity as f64 * unit_price * (1.0 - discount) + shipping;

    Ok(Sale {
        order_id: record[0].clone(),
        product_id: record[1].clone(),
        customer_id: record[2].clone(),
        product_name: record[3].clone(),
        product_category: record[4].clone(),
        region: record[5].clone(),
        order_date,
        quantity,
        unit_price,
        discount,
        shipping,
        customer_name: record[12].clone(),
        customer_email: record[13].clone(),
        customer_address: record[14].clone(),
        order_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn valid_record() -> Vec<String> {
        record(&[
            "O1", "P1", "C1", "Widget", "Tools", "NA", "2024-03-15", "2", "10.00", "0.10", "5.00", "x", "Alice",
            "a@x", "1 Main",
        ])
    }

    #[test]
    fn test_parse_valid_row() {
        let sale = parse_row(&valid_record()).unwrap();

        assert_eq!(sale.order_id, "O1");
        assert_eq!(sale.product_id, "P1");
        assert_eq!(sale.customer_id, "C1");
        assert_eq!(sale.order_date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(sale.quantity, 2);
        assert_eq!(sale.customer_name, "Alice");
        assert_eq!(sale.customer_email, "a@x");
        assert_eq!(sale.customer_address, "1 Main");
        // 2 * 10.00 * 0.9 + 5.00
        assert!((sale.order_total - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_quantity_is_malformed() {
        let mut rec = valid_record();
        rec[7] = String::new();

        let err = parse_row(&rec).unwrap_err();
        assert!(matches!(err, RowError::Quantity(_)));
    }

    #[test]
    fn test_non_numeric_price_is_malformed() {
        let mut rec = valid_record();
        rec[8] = "ten".to_string();

        assert!(matches!(parse_row(&rec).unwrap_err(), RowError::Price(_)));
    }

    #[test]
    fn test_bad_date_is_malformed() {
        let mut rec = valid_record();
        rec[6] = "15/03/2024".to_string();

        assert!(matches!(parse_row(&rec).unwrap_err(), RowError::Date(_)));
    }

    #[test]
    fn test_too_few_fields() {
        let rec = record(&["O1", "P1", "C1"]);

        assert!(matches!(parse_row(&rec).unwrap_err(), RowError::TooFewFields(3, 15)));
    }

    #[test]
    fn test_field_eleven_is_ignored() {
        let mut rec = valid_record();
        rec[11] = "anything at all".to_string();

        assert!(parse_row(&rec).is_ok());
    }

    #[test]
    fn test_entity_projection() {
        let sale = parse_row(&valid_record()).unwrap();

        let customer = sale.to_customer();
        assert_eq!(customer.id, "C1");
        assert_eq!(customer.region, "NA");

        let product = sale.to_product();
        assert_eq!(product.id, "P1");
        assert_eq!(product.category, "Tools");
        assert!((product.unit_price - 10.0).abs() < 1e-9);
    }
}
