//! Persistence boundary
//!
//! Production runs on Postgres through [`Store`]; tests run on the in-memory
//! implementation in [`memory`]. Stock decrements are conditional in a single
//! statement so concurrent checkouts cannot oversell.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::aggregates::{
    Affiliate, Commission, CommissionStatus, FulfillmentStatus, Order, PaymentStatus, Product,
};
use crate::domain::value_objects::{Money, Quantity};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

#[allow(async_fn_in_trait)]
pub trait Store {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, StoreError>;
    async fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>, StoreError>;

    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError>;
    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError>;
    /// Compensation for a settlement that failed after order creation.
    async fn delete_order(&self, id: &str) -> Result<(), StoreError>;

    /// Atomically subtracts `qty` if and only if at least `qty` units remain.
    async fn decrement_stock(&self, product_id: &str, qty: u32) -> Result<(), StoreError>;
    /// Compensation: returns previously decremented units.
    async fn increment_stock(&self, product_id: &str, qty: u32) -> Result<(), StoreError>;

    async fn get_affiliate_by_code(&self, code: &str) -> Result<Option<Affiliate>, StoreError>;
    async fn record_commission(&self, commission: &Commission) -> Result<(), StoreError>;
    /// Compensation for a settlement that failed after the commission write.
    async fn delete_commission(&self, id: &str) -> Result<(), StoreError>;
    async fn update_affiliate_stats(
        &self,
        affiliate_id: &str,
        delta_balance: Money,
        delta_sales: i64,
    ) -> Result<(), StoreError>;
    async fn record_click(&self, code: &str) -> Result<(), StoreError>;
    async fn list_commissions_for(&self, affiliate_id: &str) -> Result<Vec<Commission>, StoreError>;
}

// =============================================================================
// Postgres
// =============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    description: String,
    price: Decimal,
    stock: i32,
    sizes: Vec<String>,
    colors: Vec<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product {
            id: r.id,
            name: r.name,
            description: r.description,
            price: Money::new(r.price),
            stock: Quantity::new(r.stock.max(0) as u32),
            sizes: r.sizes,
            colors: r.colors,
            active: r.active,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    user_id: String,
    items: serde_json::Value,
    total: Decimal,
    payment_status: String,
    fulfillment_status: String,
    affiliate_id: Option<String>,
    shipping_address: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, StoreError> {
        let items = serde_json::from_value(r.items).map_err(|e| StoreError::Backend(e.to_string()))?;
        let shipping_address =
            serde_json::from_value(r.shipping_address).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Order {
            id: r.id,
            order_number: r.order_number,
            user_id: r.user_id,
            items,
            total: Money::new(r.total),
            payment_status: PaymentStatus::parse(&r.payment_status),
            fulfillment_status: FulfillmentStatus::parse(&r.fulfillment_status),
            affiliate_id: r.affiliate_id,
            shipping_address,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AffiliateRow {
    user_id: String,
    referral_code: String,
    commission_rate: Decimal,
    balance: Decimal,
    total_sales: i64,
    total_clicks: i64,
}

impl From<AffiliateRow> for Affiliate {
    fn from(r: AffiliateRow) -> Self {
        Affiliate {
            user_id: r.user_id,
            referral_code: r.referral_code,
            commission_rate: r.commission_rate,
            balance: Money::new(r.balance),
            total_sales: r.total_sales.max(0) as u64,
            total_clicks: r.total_clicks.max(0) as u64,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommissionRow {
    id: String,
    order_id: String,
    affiliate_id: String,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<CommissionRow> for Commission {
    fn from(r: CommissionRow) -> Self {
        Commission {
            id: r.id,
            order_id: r.order_id,
            affiliate_id: r.affiliate_id,
            amount: Money::new(r.amount),
            status: match r.status.as_str() {
                "paid" => CommissionStatus::Paid,
                _ => CommissionStatus::Pending,
            },
            created_at: r.created_at,
        }
    }
}

impl Store for PgStore {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE active ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        let items = serde_json::to_value(&order.items).map_err(|e| StoreError::Backend(e.to_string()))?;
        let address =
            serde_json::to_value(&order.shipping_address).map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            "INSERT INTO orders (id, order_number, user_id, items, total, payment_status, fulfillment_status, affiliate_id, shipping_address, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(items)
        .bind(order.total.amount())
        .bind(order.payment_status.as_str())
        .bind(order.fulfillment_status.as_str())
        .bind(&order.affiliate_id)
        .bind(address)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn delete_order(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn decrement_stock(&self, product_id: &str, qty: u32) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
            .bind(product_id)
            .bind(qty as i32)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::InsufficientStock {
                product_id: product_id.to_string(),
            });
        }
        Ok(())
    }

    async fn increment_stock(&self, product_id: &str, qty: u32) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(product_id)
            .bind(qty as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_affiliate_by_code(&self, code: &str) -> Result<Option<Affiliate>, StoreError> {
        let row = sqlx::query_as::<_, AffiliateRow>("SELECT * FROM affiliates WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn record_commission(&self, commission: &Commission) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO commissions (id, order_id, affiliate_id, amount, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&commission.id)
        .bind(&commission.order_id)
        .bind(&commission.affiliate_id)
        .bind(commission.amount.amount())
        .bind(commission.status.as_str())
        .bind(commission.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_commission(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM commissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_affiliate_stats(
        &self,
        affiliate_id: &str,
        delta_balance: Money,
        delta_sales: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE affiliates SET balance = balance + $2, total_sales = total_sales + $3 WHERE user_id = $1",
        )
        .bind(affiliate_id)
        .bind(delta_balance.amount())
        .bind(delta_sales)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_click(&self, code: &str) -> Result<(), StoreError> {
        // Unknown codes are ignored; the visit still renders normally.
        sqlx::query("UPDATE affiliates SET total_clicks = total_clicks + 1 WHERE referral_code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_commissions_for(&self, affiliate_id: &str) -> Result<Vec<Commission>, StoreError> {
        let rows = sqlx::query_as::<_, CommissionRow>(
            "SELECT * FROM commissions WHERE affiliate_id = $1 ORDER BY created_at DESC",
        )
        .bind(affiliate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// In-memory store for tests
// =============================================================================

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        products: HashMap<String, Product>,
        orders: HashMap<String, Order>,
        affiliates: HashMap<String, Affiliate>,
        commissions: HashMap<String, Commission>,
        fail_on: Option<String>,
        stall_on: Option<String>,
    }

    /// Hash-map backed store. A single mutex serializes every operation,
    /// which mirrors the all-or-nothing store the orchestrator assumes.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert_product(&self, product: Product) {
            let mut inner = self.inner.lock().unwrap();
            inner.products.insert(product.id.clone(), product);
        }

        pub fn insert_affiliate(&self, affiliate: Affiliate) {
            let mut inner = self.inner.lock().unwrap();
            inner.affiliates.insert(affiliate.user_id.clone(), affiliate);
        }

        /// Makes the named operation fail with a backend error.
        pub fn fail_on(&self, op: &str) {
            self.inner.lock().unwrap().fail_on = Some(op.to_string());
        }

        /// Makes the named operation hang well past any checkout deadline.
        pub fn stall_on(&self, op: &str) {
            self.inner.lock().unwrap().stall_on = Some(op.to_string());
        }

        pub fn stock_of(&self, product_id: &str) -> u32 {
            self.inner.lock().unwrap().products[product_id].stock.value()
        }

        pub fn order_count(&self) -> usize {
            self.inner.lock().unwrap().orders.len()
        }

        pub fn commissions(&self) -> Vec<Commission> {
            self.inner.lock().unwrap().commissions.values().cloned().collect()
        }

        pub fn affiliate(&self, user_id: &str) -> Affiliate {
            self.inner.lock().unwrap().affiliates[user_id].clone()
        }

        async fn check(&self, op: &str) -> Result<(), StoreError> {
            let (fail, stall) = {
                let inner = self.inner.lock().unwrap();
                (
                    inner.fail_on.as_deref() == Some(op),
                    inner.stall_on.as_deref() == Some(op),
                )
            };
            if stall {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
            if fail {
                return Err(StoreError::Backend(format!("{op} unavailable")));
            }
            Ok(())
        }
    }

    impl Store for MemoryStore {
        async fn get_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
            self.check("get_product").await?;
            Ok(self.inner.lock().unwrap().products.get(id).cloned())
        }

        async fn list_products(&self, limit: i64, _offset: i64) -> Result<Vec<Product>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .products
                .values()
                .filter(|p| p.active)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
            self.check("create_order").await?;
            let mut inner = self.inner.lock().unwrap();
            inner.orders.insert(order.id.clone(), order.clone());
            Ok(())
        }

        async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
            Ok(self.inner.lock().unwrap().orders.get(id).cloned())
        }

        async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
            let inner = self.inner.lock().unwrap();
            let mut orders: Vec<Order> = inner
                .orders
                .values()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect();
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(orders)
        }

        async fn delete_order(&self, id: &str) -> Result<(), StoreError> {
            self.inner.lock().unwrap().orders.remove(id);
            Ok(())
        }

        async fn decrement_stock(&self, product_id: &str, qty: u32) -> Result<(), StoreError> {
            self.check("decrement_stock").await?;
            let mut inner = self.inner.lock().unwrap();
            let product = inner
                .products
                .get_mut(product_id)
                .ok_or_else(|| StoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                })?;
            match product.stock.subtract(qty) {
                Some(remaining) => {
                    product.stock = remaining;
                    Ok(())
                }
                None => Err(StoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                }),
            }
        }

        async fn increment_stock(&self, product_id: &str, qty: u32) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(product) = inner.products.get_mut(product_id) {
                product.stock = product.stock.add(qty);
            }
            Ok(())
        }

        async fn get_affiliate_by_code(&self, code: &str) -> Result<Option<Affiliate>, StoreError> {
            self.check("get_affiliate_by_code").await?;
            let inner = self.inner.lock().unwrap();
            Ok(inner.affiliates.values().find(|a| a.referral_code == code).cloned())
        }

        async fn record_commission(&self, commission: &Commission) -> Result<(), StoreError> {
            self.check("record_commission").await?;
            let mut inner = self.inner.lock().unwrap();
            inner.commissions.insert(commission.id.clone(), commission.clone());
            Ok(())
        }

        async fn delete_commission(&self, id: &str) -> Result<(), StoreError> {
            self.inner.lock().unwrap().commissions.remove(id);
            Ok(())
        }

        async fn update_affiliate_stats(
            &self,
            affiliate_id: &str,
            delta_balance: Money,
            delta_sales: i64,
        ) -> Result<(), StoreError> {
            self.check("update_affiliate_stats").await?;
            let mut inner = self.inner.lock().unwrap();
            if let Some(a) = inner.affiliates.get_mut(affiliate_id) {
                a.balance = a.balance.add(delta_balance);
                a.total_sales = a.total_sales.saturating_add_signed(delta_sales);
            }
            Ok(())
        }

        async fn record_click(&self, code: &str) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(a) = inner.affiliates.values_mut().find(|a| a.referral_code == code) {
                a.total_clicks += 1;
            }
            Ok(())
        }

        async fn list_commissions_for(&self, affiliate_id: &str) -> Result<Vec<Commission>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .commissions
                .values()
                .filter(|c| c.affiliate_id == affiliate_id)
                .cloned()
                .collect())
        }
    }
}
