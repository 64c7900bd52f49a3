//! # Checkout Snapshots
//!
//! The immutable record of what the customer agreed to pay. A snapshot is
//! frozen at session creation and attached to the processor session as
//! opaque metadata: the ephemeral product is throwaway, so the metadata is
//! the only durable link between the quoted cart and the confirmed payment.

use crate::cart::{PriceQuote, QuotedLine};
use crate::error::{CheckoutError, CheckoutResult};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One frozen cart line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_ref: String,
    pub name: String,
    /// Unit price in minor units of the quote currency at snapshot time
    pub unit_price_minor: i64,
    pub quantity: u32,
}

/// Frozen cart contents and totals. Subsequent cart edits never touch an
/// existing snapshot; order materialization reads only from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub owner_id: String,
    pub lines: Vec<SnapshotLine>,
    pub subtotal_minor: i64,
    pub shipping_minor: i64,
    pub total_minor: i64,
    pub currency: Currency,
    /// Amount registered with the processor, in settlement minor units
    pub settlement_minor: i64,
    pub settlement_currency: Currency,
}

impl CartSnapshot {
    /// Freeze quoted lines and totals
    pub fn freeze(
        owner_id: &str,
        lines: &[QuotedLine],
        quote: &PriceQuote,
        settlement_minor: i64,
        settlement_currency: Currency,
    ) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            lines: lines
                .iter()
                .map(|l| SnapshotLine {
                    product_ref: l.product_ref.clone(),
                    name: l.name.clone(),
                    unit_price_minor: l.unit_price.minor,
                    quantity: l.quantity,
                })
                .collect(),
            subtotal_minor: quote.subtotal.minor,
            shipping_minor: quote.shipping_fee.minor,
            total_minor: quote.total.minor,
            currency: quote.subtotal.currency,
            settlement_minor,
            settlement_currency,
        }
    }

    /// Total item units across all lines
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Display name for the ephemeral product representing this cart
    pub fn product_name(&self) -> String {
        format!("Ceramika order ({} items)", self.item_count())
    }

    /// Description for the ephemeral product, e.g. "2x Vase bleu, 1x Bol"
    pub fn describe(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{}x {}", l.quantity, l.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Encode as session metadata. String values only; the processor treats
    /// metadata as opaque.
    pub fn to_metadata(&self) -> CheckoutResult<HashMap<String, String>> {
        let items = serde_json::to_string(&self.lines)
            .map_err(|e| CheckoutError::Serialization(e.to_string()))?;

        let mut meta = HashMap::new();
        meta.insert("owner_id".to_string(), self.owner_id.clone());
        meta.insert("cart_subtotal".to_string(), self.subtotal_minor.to_string());
        meta.insert("cart_shipping".to_string(), self.shipping_minor.to_string());
        meta.insert("cart_total".to_string(), self.total_minor.to_string());
        meta.insert("cart_currency".to_string(), self.currency.as_str().to_string());
        meta.insert("item_count".to_string(), self.item_count().to_string());
        meta.insert(
            "settlement_amount".to_string(),
            self.settlement_minor.to_string(),
        );
        meta.insert(
            "settlement_currency".to_string(),
            self.settlement_currency.as_str().to_string(),
        );
        meta.insert("cart_items".to_string(), items);
        Ok(meta)
    }

    /// Decode from session metadata fetched back from the processor
    pub fn from_metadata(meta: &HashMap<String, String>) -> CheckoutResult<Self> {
        fn required<'a>(
            meta: &'a HashMap<String, String>,
            key: &str,
        ) -> CheckoutResult<&'a str> {
            meta.get(key).map(String::as_str).ok_or_else(|| {
                CheckoutError::Serialization(format!("session metadata missing '{}'", key))
            })
        }

        fn minor(meta: &HashMap<String, String>, key: &str) -> CheckoutResult<i64> {
            required(meta, key)?.parse().map_err(|_| {
                CheckoutError::Serialization(format!("session metadata '{}' is not an amount", key))
            })
        }

        fn currency(meta: &HashMap<String, String>, key: &str) -> CheckoutResult<Currency> {
            let code = required(meta, key)?;
            Currency::parse(code).ok_or_else(|| {
                CheckoutError::Serialization(format!(
                    "unknown currency '{}' in session metadata",
                    code
                ))
            })
        }

        let lines: Vec<SnapshotLine> = serde_json::from_str(required(meta, "cart_items")?)
            .map_err(|e| {
                CheckoutError::Serialization(format!("bad 'cart_items' in session metadata: {}", e))
            })?;

        Ok(Self {
            owner_id: required(meta, "owner_id")?.to_string(),
            lines,
            subtotal_minor: minor(meta, "cart_subtotal")?,
            shipping_minor: minor(meta, "cart_shipping")?,
            total_minor: minor(meta, "cart_total")?,
            currency: currency(meta, "cart_currency")?,
            settlement_minor: minor(meta, "settlement_amount")?,
            settlement_currency: currency(meta, "settlement_currency")?,
        })
    }
}

/// A checkout session created with the processor. Immutable once created;
/// the processor owns its lifecycle state from here on.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    /// Processor-assigned session id
    pub session_id: String,
    pub owner_id: String,
    /// Hosted payment page to redirect the customer to
    pub checkout_url: String,
    /// Ephemeral product registered for this cart (for cancel cleanup)
    pub ephemeral_product_ref: String,
    pub snapshot: CartSnapshot,
    pub success_url: String,
    pub cancel_url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> CartSnapshot {
        CartSnapshot {
            owner_id: "alice".into(),
            lines: vec![
                SnapshotLine {
                    product_ref: "vase-bleu".into(),
                    name: "Vase bleu".into(),
                    unit_price_minor: 4500,
                    quantity: 2,
                },
                SnapshotLine {
                    product_ref: "bol-gres".into(),
                    name: "Bol gres".into(),
                    unit_price_minor: 1200,
                    quantity: 1,
                },
            ],
            subtotal_minor: 10200,
            shipping_minor: 120,
            total_minor: 10320,
            currency: Currency::EUR,
            settlement_minor: 11146,
            settlement_currency: Currency::USD,
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let snapshot = sample_snapshot();
        let meta = snapshot.to_metadata().unwrap();

        assert_eq!(meta.get("owner_id").unwrap(), "alice");
        assert_eq!(meta.get("cart_total").unwrap(), "10320");
        assert_eq!(meta.get("item_count").unwrap(), "3");
        assert_eq!(meta.get("settlement_amount").unwrap(), "11146");

        let decoded = CartSnapshot::from_metadata(&meta).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_metadata_missing_key_is_an_error() {
        let snapshot = sample_snapshot();
        let mut meta = snapshot.to_metadata().unwrap();
        meta.remove("cart_items");

        let err = CartSnapshot::from_metadata(&meta).unwrap_err();
        assert!(matches!(err, CheckoutError::Serialization(_)));
    }

    #[test]
    fn test_ephemeral_product_naming() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.product_name(), "Ceramika order (3 items)");
        assert_eq!(snapshot.describe(), "2x Vase bleu, 1x Bol gres");
    }
}
