//! Value objects shared across the commerce domain

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rounds a money amount to 2 decimal places, half-up.
///
/// Applied once per unit price before multiplication and once more on
/// the final aggregate. Intermediate line totals are never re-rounded.
pub fn round_half_up(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Line total from an already-rounded unit price.
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// Converts a 2-place amount into minor currency units (cents).
///
/// `None` when the amount does not fit in an `i64`, which the caller
/// must treat as an invalid charge amount.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    (round_half_up(amount) * Decimal::ONE_HUNDRED).trunc().to_i64()
}

/// Closed set of account roles. Authorization boundaries match on this
/// exhaustively; there are no string role comparisons anywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Vendor,
    Manager,
    Admin,
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "vendor" => Ok(Role::Vendor),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => write!(f, "customer"),
            Role::Vendor => write!(f, "vendor"),
            Role::Manager => write!(f, "manager"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleParseError(pub String);

impl std::error::Error for RoleParseError {}
impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up_at_the_midpoint() {
        assert_eq!(round_half_up(dec!(2.005)), dec!(2.01));
        assert_eq!(round_half_up(dec!(2.004)), dec!(2.00));
        assert_eq!(round_half_up(dec!(29.99)), dec!(29.99));
    }

    #[test]
    fn line_total_uses_rounded_unit_price() {
        let unit = round_half_up(dec!(29.99));
        assert_eq!(line_total(unit, 2), dec!(59.98));
    }

    #[test]
    fn minor_units_are_cents() {
        assert_eq!(minor_units(dec!(59.98)), Some(5998));
        assert_eq!(minor_units(dec!(0.01)), Some(1));
        assert_eq!(minor_units(Decimal::ZERO), Some(0));
    }

    #[test]
    fn role_round_trips() {
        assert_eq!("vendor".parse::<Role>().unwrap(), Role::Vendor);
        assert_eq!(Role::Admin.to_string(), "admin");
        assert!("superuser".parse::<Role>().is_err());
    }
}
