//! Checkout orchestration
//!
//! The first write happens in the settling phase. Any failure after that
//! point runs the compensation sequence before the error surfaces, so the
//! caller never observes a partial settlement.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::domain::aggregates::{
    Affiliate, Cart, Commission, CommissionError, Order, ShippingAddress,
};
use crate::referral::ReferralTracker;
use crate::store::{Store, StoreError};

/// Deadline applied to each individual store call. An elapsed deadline is
/// treated as a persistence failure and rolls the attempt back.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Validating,
    Reserving,
    Settling,
    Committed,
    RolledBack,
}

#[derive(Clone, Debug)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub commission: Option<Commission>,
}

#[derive(Error, Debug)]
pub enum CheckoutError {
    /// User-correctable; nothing was read or written.
    #[error("invalid checkout: {0}")]
    InvalidCheckout(&'static str),

    /// Stock moved under us. The cart is left intact for retry.
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: String },

    /// Affiliate configuration defect, fatal to this attempt.
    #[error(transparent)]
    InvalidRate(#[from] CommissionError),

    /// A collaborator write failed; prior writes were rolled back. Retryable.
    #[error("order could not be settled: {0}")]
    PersistenceFailure(String),
}

impl From<StoreError> for CheckoutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientStock { product_id } => Self::InsufficientStock { product_id },
            StoreError::Backend(msg) => Self::PersistenceFailure(msg),
        }
    }
}

pub struct CheckoutOrchestrator<'a, S> {
    store: &'a S,
    op_timeout: Duration,
}

impl<'a, S: Store> CheckoutOrchestrator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Settles the cart into an order for `user_id`.
    ///
    /// On success the cart is cleared and the referral attribution, if it
    /// funded a commission, is consumed. On failure both are left untouched
    /// so the user can correct and retry.
    pub async fn checkout(
        &self,
        cart: &mut Cart,
        tracker: &mut ReferralTracker,
        user_id: &str,
        address: ShippingAddress,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let mut phase = Phase::Validating;
        tracing::debug!(user_id, ?phase, "checkout started");

        if cart.is_empty() {
            return Err(CheckoutError::InvalidCheckout("cart is empty"));
        }
        if cart.lines().iter().any(|l| l.quantity == 0) {
            return Err(CheckoutError::InvalidCheckout("cart contains a zero-quantity line"));
        }
        if !address.is_complete() {
            return Err(CheckoutError::InvalidCheckout("shipping address is incomplete"));
        }

        // A code that resolves to nobody is not a checkout failure: the order
        // proceeds unattributed and the stale code is discarded at commit.
        let mut code_resolved = false;
        let affiliate: Option<Affiliate> = match tracker.active() {
            Some(attribution) => {
                let found = self
                    .guard(self.store.get_affiliate_by_code(&attribution.code))
                    .await?;
                if found.is_none() {
                    tracing::warn!(code = %attribution.code, "referral code resolves to no affiliate");
                }
                code_resolved = found.is_some();
                found
            }
            None => None,
        };

        phase = Phase::Reserving;
        for line in cart.lines() {
            let product = self
                .guard(self.store.get_product(&line.product_id))
                .await?
                .ok_or_else(|| CheckoutError::InsufficientStock {
                    product_id: line.product_id.clone(),
                })?;
            if !product.has_stock_for(line.quantity) {
                tracing::debug!(product_id = %line.product_id, ?phase, "reservation failed");
                return Err(CheckoutError::InsufficientStock {
                    product_id: line.product_id.clone(),
                });
            }
        }

        let order = Order::place(
            user_id,
            cart.lines().to_vec(),
            affiliate.as_ref().map(|a| a.user_id.clone()),
            address,
        )
        .map_err(|_| CheckoutError::InvalidCheckout("cart is empty"))?;

        let commission = match &affiliate {
            Some(a) => {
                let amount = a.commission_for(order.total).map_err(|e| {
                    tracing::error!(affiliate = %a.user_id, rate = %a.commission_rate, "invalid commission rate");
                    e
                })?;
                Some(Commission::record(&order.id, &a.user_id, amount))
            }
            None => None,
        };

        phase = Phase::Settling;
        tracing::debug!(order_id = %order.id, ?phase, "settling order");
        self.guard(self.store.create_order(&order)).await?;

        let mut decremented: Vec<(String, u32)> = Vec::with_capacity(order.items.len());
        for line in &order.items {
            match self.guard(self.store.decrement_stock(&line.product_id, line.quantity)).await {
                Ok(()) => decremented.push((line.product_id.clone(), line.quantity)),
                Err(e) => {
                    self.roll_back(&order.id, &decremented, None).await;
                    return Err(e.into());
                }
            }
        }

        if let Some(c) = &commission {
            if let Err(e) = self.guard(self.store.record_commission(c)).await {
                self.roll_back(&order.id, &decremented, None).await;
                return Err(e.into());
            }
            if let Err(e) = self
                .guard(self.store.update_affiliate_stats(&c.affiliate_id, c.amount, 1))
                .await
            {
                self.roll_back(&order.id, &decremented, Some(&c.id)).await;
                return Err(e.into());
            }
        }

        phase = Phase::Committed;
        cart.clear();
        if commission.is_some() || (tracker.active().is_some() && !code_resolved) {
            tracker.consume();
        }
        tracing::info!(order_id = %order.id, total = %order.total, ?phase, "checkout committed");
        Ok(CheckoutOutcome { order, commission })
    }

    /// Compensation sequence, in reverse order of the writes. Best-effort: a
    /// failed undo is logged for reconciliation, the original error still
    /// surfaces to the caller.
    async fn roll_back(&self, order_id: &str, decremented: &[(String, u32)], commission_id: Option<&str>) {
        let phase = Phase::RolledBack;
        if let Some(id) = commission_id {
            if let Err(e) = self.guard(self.store.delete_commission(id)).await {
                tracing::error!(commission_id = id, error = %e, "rollback failed to delete commission");
            }
        }
        for (product_id, qty) in decremented {
            if let Err(e) = self.guard(self.store.increment_stock(product_id, *qty)).await {
                tracing::error!(product_id = %product_id, qty = *qty, error = %e, "rollback failed to restock");
            }
        }
        if let Err(e) = self.guard(self.store.delete_order(order_id)).await {
            tracing::error!(order_id, error = %e, "rollback failed to delete order");
        }
        tracing::warn!(order_id, ?phase, "checkout rolled back");
    }

    async fn guard<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Backend("store operation timed out".into())),
        }
    }
}
