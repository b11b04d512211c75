//! Moda Elite storefront
//!
//! Cart, referral attribution and checkout settlement for a fashion
//! storefront with an affiliate program.

pub mod checkout;
pub mod domain;
pub mod events;
pub mod referral;
pub mod store;
