//! Value objects for the storefront core

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in BRL. The storefront is single-currency, so the
/// value object carries only the decimal amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }
    pub fn amount(&self) -> Decimal {
        self.0
    }
    pub fn add(&self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
    pub fn multiply(&self, qty: u32) -> Money {
        Money(self.0 * Decimal::from(qty))
    }
    /// Rounds half-up to centavos, the smallest currency unit.
    pub fn round_centavos(&self) -> Money {
        Money(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R$ {:.2}", self.0)
    }
}

/// Non-negative stock count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self {
        Self(value)
    }
    pub fn value(&self) -> u32 {
        self.0
    }
    pub fn add(&self, other: u32) -> Self {
        Self(self.0.saturating_add(other))
    }
    /// Returns `None` instead of going negative.
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 {
            None
        } else {
            Some(Self(self.0 - other))
        }
    }
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Identity of a cart line: one product in one size and one color. Size and
/// color may be empty for products sold without variants.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey {
    product_id: String,
    size: String,
    color: String,
}

impl VariantKey {
    pub fn new(product_id: impl Into<String>, size: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            size: size.into(),
            color: color.into(),
        }
    }
    pub fn product_id(&self) -> &str {
        &self.product_id
    }
    pub fn size(&self) -> &str {
        &self.size
    }
    pub fn color(&self) -> &str {
        &self.color
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.product_id, self.size, self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(dec!(100));
        let b = Money::new(dec!(50.50));
        assert_eq!(a.add(b).amount(), dec!(150.50));
        assert_eq!(b.multiply(3).amount(), dec!(151.50));
    }

    #[test]
    fn test_money_rounds_half_up() {
        assert_eq!(Money::new(dec!(10.005)).round_centavos().amount(), dec!(10.01));
        assert_eq!(Money::new(dec!(10.004)).round_centavos().amount(), dec!(10.00));
    }

    #[test]
    fn test_quantity_never_negative() {
        let q = Quantity::new(3);
        assert_eq!(q.subtract(2), Some(Quantity::new(1)));
        assert_eq!(q.subtract(4), None);
    }

    #[test]
    fn test_variant_key_identity() {
        let a = VariantKey::new("P1", "M", "Preto");
        let b = VariantKey::new("P1", "M", "Preto");
        let c = VariantKey::new("P1", "G", "Preto");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(c, VariantKey::new("P1", "Preto", "G"));
    }
}
