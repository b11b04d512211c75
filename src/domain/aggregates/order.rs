//! Order aggregate
//!
//! An immutable snapshot of the cart lines at checkout. Only the payment
//! and fulfillment statuses change afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::CartLine;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub number: Option<String>,
    pub city: String,
    pub zip: String,
}

impl ShippingAddress {
    pub fn is_complete(&self) -> bool {
        !self.street.trim().is_empty() && !self.city.trim().is_empty() && !self.zip.trim().is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paid" => Self::Paid,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    #[default]
    Processing,
    Shipped,
    Delivered,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shipped" => Self::Shipped,
            "delivered" => Self::Delivered,
            _ => Self::Processing,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub items: Vec<CartLine>,
    pub total: Money,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub affiliate_id: Option<String>,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Snapshots the given cart lines into a new order. The payment gateway
    /// is treated as an already-succeeded external event, so the order is
    /// born paid and processing.
    pub fn place(
        user_id: impl Into<String>,
        items: Vec<CartLine>,
        affiliate_id: Option<String>,
        shipping_address: ShippingAddress,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        let total = items
            .iter()
            .fold(Money::zero(), |acc, l| acc.add(l.line_total()))
            .round_centavos();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            order_number: format!("ORD-{:08}", rand::random::<u32>() % 100_000_000),
            user_id: user_id.into(),
            items,
            total,
            payment_status: PaymentStatus::Paid,
            fulfillment_status: FulfillmentStatus::Processing,
            affiliate_id,
            shipping_address,
            created_at: Utc::now(),
        })
    }

    pub fn ship(&mut self) {
        self.fulfillment_status = FulfillmentStatus::Shipped;
    }

    pub fn deliver(&mut self) {
        self.fulfillment_status = FulfillmentStatus::Delivered;
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if self.fulfillment_status == FulfillmentStatus::Delivered {
            return Err(OrderError::AlreadyDelivered);
        }
        self.payment_status = PaymentStatus::Cancelled;
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,

    #[error("delivered orders cannot be cancelled")]
    AlreadyDelivered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: &str, price: rust_decimal::Decimal, qty: u32) -> CartLine {
        CartLine {
            product_id: product_id.into(),
            name: "Camiseta".into(),
            unit_price: Money::new(price),
            size: "M".into(),
            color: "Preto".into(),
            quantity: qty,
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: "Rua das Flores".into(),
            number: Some("120".into()),
            city: "São Paulo".into(),
            zip: "01000-000".into(),
        }
    }

    #[test]
    fn test_place_snapshots_and_totals() {
        let order = Order::place("user-1", vec![line("a", dec!(50), 2), line("b", dec!(19.90), 1)], None, address()).unwrap();
        assert_eq!(order.total.amount(), dec!(119.90));
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
        assert_eq!(order.items.len(), 2);
    }

    #[test]
    fn test_place_rejects_empty_items() {
        assert_eq!(
            Order::place("user-1", vec![], None, address()).unwrap_err(),
            OrderError::NoItems
        );
    }

    #[test]
    fn test_delivered_order_cannot_cancel() {
        let mut order = Order::place("user-1", vec![line("a", dec!(10), 1)], None, address()).unwrap();
        order.ship();
        order.deliver();
        assert_eq!(order.cancel().unwrap_err(), OrderError::AlreadyDelivered);
    }

    #[test]
    fn test_incomplete_address_detected() {
        let mut addr = address();
        addr.city = "  ".into();
        assert!(!addr.is_complete());
        assert!(address().is_complete());
    }
}
