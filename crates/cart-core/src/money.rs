//! # Money Types
//!
//! All amounts travel as integer minor units (cents). The display currency
//! for the storefront is EUR; the processor settles in USD.

use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    EUR,
    USD,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::EUR => "eur",
            Currency::USD => "usd",
        }
    }

    /// Parse an ISO 4217 code, case-insensitive
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "eur" => Some(Currency::EUR),
            "usd" => Some(Currency::USD),
            _ => None,
        }
    }

    /// Returns the number of decimal places for this currency
    pub fn decimal_places(&self) -> u8 {
        2
    }

    /// Multiplier between major and minor units (100 for two-decimal currencies)
    pub fn minor_scale(&self) -> i64 {
        10_i64.pow(self.decimal_places() as u32)
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::EUR
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// An amount in the smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// Amount in minor units (cents)
    pub minor: i64,
    /// Currency
    pub currency: Currency,
}

impl Amount {
    /// Create an amount from minor units
    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    /// Create an amount from a decimal major-unit value (display entry only;
    /// arithmetic stays in minor units)
    pub fn from_major(major: f64, currency: Currency) -> Self {
        Self {
            minor: (major * currency.minor_scale() as f64).round() as i64,
            currency,
        }
    }

    /// Zero in the given currency
    pub fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Get the decimal major-unit value
    pub fn as_major(&self) -> f64 {
        self.minor as f64 / self.currency.minor_scale() as f64
    }

    /// Format for display (e.g., "20.80 EUR")
    pub fn display(&self) -> String {
        format!("{:.2} {}", self.as_major(), self.currency)
    }
}
