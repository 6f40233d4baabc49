use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{config::AppConfig, errors::ServiceError, services::catalog::ResolvedLine};

/// Priced snapshot of a cart. Once written into an order these numbers are
/// never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PriceQuote {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Pure pricing arithmetic over `rust_decimal`. No I/O, no rounding drift:
/// every amount is rounded to 2 decimal places before it is combined.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    shipping_flat_rate: Decimal,
    tax_rate: Decimal,
}

impl PricingEngine {
    pub fn new(shipping_flat_rate: Decimal, tax_rate: Decimal) -> Self {
        Self {
            shipping_flat_rate,
            tax_rate,
        }
    }

    /// Parses rates from configuration strings.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let shipping = cfg.shipping_flat_rate.parse::<Decimal>().map_err(|_| {
            ServiceError::ValidationError(format!(
                "Invalid shipping_flat_rate: {}",
                cfg.shipping_flat_rate
            ))
        })?;
        let tax = cfg.tax_rate.parse::<Decimal>().map_err(|_| {
            ServiceError::ValidationError(format!("Invalid tax_rate: {}", cfg.tax_rate))
        })?;
        Ok(Self::new(shipping, tax))
    }

    /// Computes the quote for a resolved cart. Holds the invariant
    /// `total == subtotal + tax + shipping - discount` by construction.
    pub fn quote(&self, lines: &[ResolvedLine], discount: Decimal) -> PriceQuote {
        let subtotal: Decimal = lines
            .iter()
            .map(|line| line.line_total())
            .sum::<Decimal>()
            .round_dp(2);

        let shipping = if lines.is_empty() {
            Decimal::ZERO
        } else {
            self.shipping_flat_rate.round_dp(2)
        };
        let tax = (subtotal * self.tax_rate).round_dp(2);
        let discount = discount.round_dp(2).min(subtotal);

        PriceQuote {
            subtotal,
            shipping,
            tax,
            discount,
            total: subtotal + tax + shipping - discount,
        }
    }
}
