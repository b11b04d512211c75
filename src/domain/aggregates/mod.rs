//! Aggregates module
pub mod affiliate;
pub mod cart;
pub mod order;
pub mod product;

pub use affiliate::{compute_commission, Affiliate, Commission, CommissionError, CommissionStatus};
pub use cart::{Cart, CartError, CartLine};
pub use order::{FulfillmentStatus, Order, OrderError, PaymentStatus, ShippingAddress};
pub use product::Product;
