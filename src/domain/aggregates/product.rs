//! Product aggregate
//!
//! Catalog reference data. The storefront core only reads products; stock
//! mutation happens through the persistence boundary so concurrent checkouts
//! contend on the stored count, not on this in-memory copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: Quantity,
    pub sizes: Vec<String>,
    pub colors: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn create(name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            price,
            stock: Quantity::new(stock),
            sizes: vec![],
            colors: vec![],
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_variants(mut self, sizes: &[&str], colors: &[&str]) -> Self {
        self.sizes = sizes.iter().map(|s| s.to_string()).collect();
        self.colors = colors.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn is_in_stock(&self) -> bool {
        !self.stock.is_zero()
    }

    pub fn has_stock_for(&self, qty: u32) -> bool {
        self.stock.value() >= qty
    }
}
