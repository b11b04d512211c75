//! Affiliate aggregate and commission policy

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Affiliate {
    pub user_id: String,
    pub referral_code: String,
    pub commission_rate: Decimal,
    pub balance: Money,
    pub total_sales: u64,
    pub total_clicks: u64,
}

impl Affiliate {
    /// Commission owed to this affiliate for an order of the given total,
    /// at the rate in force right now. The amount is frozen into the
    /// [`Commission`] record and never recomputed.
    pub fn commission_for(&self, order_total: Money) -> Result<Money, CommissionError> {
        compute_commission(order_total, self.commission_rate)
    }
}

/// `order_total × rate`, rounded half-up to centavos.
///
/// A rate outside [0, 1] is a configuration defect, not user input, and
/// fails the computation.
pub fn compute_commission(order_total: Money, rate: Decimal) -> Result<Money, CommissionError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(CommissionError::InvalidRate(rate));
    }
    Ok(Money::new(order_total.amount() * rate).round_centavos())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    #[default]
    Pending,
    Paid,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commission {
    pub id: String,
    pub order_id: String,
    pub affiliate_id: String,
    pub amount: Money,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

impl Commission {
    pub fn record(order_id: impl Into<String>, affiliate_id: impl Into<String>, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            affiliate_id: affiliate_id.into(),
            amount,
            status: CommissionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommissionError {
    #[error("commission rate {0} outside [0, 1]")]
    InvalidRate(Decimal),
}
