//! Domain events published after a committed checkout

use rust_decimal::Decimal;
use serde::Serialize;

use crate::checkout::CheckoutOutcome;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorefrontEvent {
    OrderPlaced {
        order_id: String,
        order_number: String,
        user_id: String,
        total: Decimal,
    },
    CommissionRecorded {
        commission_id: String,
        order_id: String,
        affiliate_id: String,
        amount: Decimal,
    },
}

impl StorefrontEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderPlaced { .. } => "storefront.orders.placed",
            Self::CommissionRecorded { .. } => "storefront.commissions.recorded",
        }
    }

    /// Events raised by a committed settlement, in write order.
    pub fn from_outcome(outcome: &CheckoutOutcome) -> Vec<StorefrontEvent> {
        let mut events = vec![Self::OrderPlaced {
            order_id: outcome.order.id.clone(),
            order_number: outcome.order.order_number.clone(),
            user_id: outcome.order.user_id.clone(),
            total: outcome.order.total.amount(),
        }];
        if let Some(c) = &outcome.commission {
            events.push(Self::CommissionRecorded {
                commission_id: c.id.clone(),
                order_id: c.order_id.clone(),
                affiliate_id: c.affiliate_id.clone(),
                amount: c.amount.amount(),
            });
        }
        events
    }
}
