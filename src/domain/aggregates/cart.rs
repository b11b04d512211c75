//! Cart aggregate
//!
//! One line per variant key; totals are derived from the lines on every read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aggregates::Product;
use crate::domain::value_objects::{Money, VariantKey};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub unit_price: Money,
    pub size: String,
    pub color: String,
    pub quantity: u32,
}

impl CartLine {
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(&self.product_id, &self.size, &self.color)
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Adds `quantity` units of a product variant, merging into an existing
    /// line when the variant key matches. Existing lines keep their position;
    /// new variants append.
    pub fn add_item(
        &mut self,
        product: &Product,
        size: &str,
        color: &str,
        quantity: u32,
    ) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        if !product.is_in_stock() {
            return Err(CartError::OutOfStock {
                product_id: product.id.clone(),
            });
        }
        let key = VariantKey::new(&product.id, size, color);
        if let Some(existing) = self.lines.iter_mut().find(|l| l.variant_key() == key) {
            existing.quantity = existing.quantity.saturating_add(quantity);
        } else {
            self.lines.push(CartLine {
                product_id: product.id.clone(),
                name: product.name.clone(),
                unit_price: product.price,
                size: size.to_string(),
                color: color.to_string(),
                quantity,
            });
        }
        Ok(())
    }

    /// Removes the line with the given variant key. Absent keys are a no-op.
    pub fn remove_item(&mut self, key: &VariantKey) {
        self.lines.retain(|l| l.variant_key() != *key);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn total_items(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    pub fn total_price(&self) -> Money {
        self.lines
            .iter()
            .fold(Money::zero(), |acc, l| acc.add(l.line_total()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("product {product_id} is out of stock")]
    OutOfStock { product_id: String },
}
