//! # Pricing Policy
//!
//! Pure, stateless pricing rules: per-item shipping surcharge, the
//! minimum-order gate, and currency conversion for settlement.
//!
//! The storefront quotes in EUR; the processor only settles in USD, so the
//! quoted total is converted once at session creation and frozen.

use crate::error::{CheckoutError, CheckoutResult};
use crate::money::Currency;

/// Pricing rules for the storefront.
///
/// The minimum-order gate runs server-side here; any client-side copy of the
/// check is a UX convenience only and is never trusted.
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    /// Currency of record for quotes
    pub currency: Currency,
    /// Currency the processor captures funds in
    pub settlement_currency: Currency,
    /// Shipping surcharge per item unit, in minor units (0.40 EUR)
    pub per_item_shipping_minor: i64,
    /// Minimum order total, in minor units
    pub minimum_order_minor: i64,
    /// Conversion rate from quote currency to settlement currency
    pub settlement_rate: f64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            currency: Currency::EUR,
            settlement_currency: Currency::USD,
            per_item_shipping_minor: 40,
            minimum_order_minor: 200_00,
            settlement_rate: 1.08,
        }
    }
}

impl PricingPolicy {
    /// Shipping fee for a cart, in minor units. `item_count` is the total
    /// number of item units (sum of quantities), not distinct lines.
    pub fn shipping_fee(&self, item_count: u32) -> i64 {
        item_count as i64 * self.per_item_shipping_minor
    }

    /// Reject totals below the configured minimum. A total exactly equal to
    /// the minimum passes.
    pub fn enforce_minimum(&self, total_minor: i64) -> CheckoutResult<()> {
        if total_minor < self.minimum_order_minor {
            return Err(CheckoutError::BelowMinimumOrder {
                total: total_minor,
                minimum: self.minimum_order_minor,
            });
        }
        Ok(())
    }

    /// Convert a major-unit amount in the quote currency to integer minor
    /// units of the settlement currency, rounding half to even. A misrounded
    /// settlement amount is a financial bug, so truncation is never used.
    pub fn convert_for_settlement(&self, amount_major: f64) -> i64 {
        let scale = self.settlement_currency.minor_scale() as f64;
        round_half_even(amount_major * self.settlement_rate * scale)
    }

    /// Convert a minor-unit amount in the quote currency for settlement.
    pub fn settle_minor(&self, amount_minor: i64) -> i64 {
        let scale = self.currency.minor_scale() as f64;
        self.convert_for_settlement(amount_minor as f64 / scale)
    }
}

/// Round to the nearest integer, ties to even (banker's rounding).
///
/// The half-way comparison tolerates the tiny drift of decimal fractions in
/// binary floating point (e.g. 0.005 * 100).
pub fn round_half_even(value: f64) -> i64 {
    const EPS: f64 = 1e-9;
    let floor = value.floor();
    let frac = value - floor;
    if (frac - 0.5).abs() < EPS {
        let f = floor as i64;
        if f % 2 == 0 {
            f
        } else {
            f + 1
        }
    } else {
        value.round() as i64
    }
}
