//! # Cart Store
//!
//! Per-customer cart lines and the live price quote. A quote is derived
//! state: it is recomputed from the current lines and the product's
//! *current* catalog price on every read, never cached across a mutation.
//! Prices may change between add-to-cart and checkout, and the live price
//! is always the one charged.

use crate::error::{CheckoutError, CheckoutResult};
use crate::money::{Amount, Currency};
use crate::pricing::PricingPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// One line in a customer's cart, unique per (owner, product)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub owner_id: String,
    pub product_ref: String,
    pub quantity: u32,
}

/// A cart line joined with its live catalog price
#[derive(Debug, Clone, Serialize)]
pub struct QuotedLine {
    pub product_ref: String,
    pub name: String,
    pub unit_price: Amount,
    pub quantity: u32,
    pub line_total: Amount,
}

/// Derived totals for a cart; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub subtotal: Amount,
    pub shipping_fee: Amount,
    pub total: Amount,
    /// Total item units (sum of quantities)
    pub item_count: u32,
}

impl PriceQuote {
    /// Compute totals from priced lines. Tax is fixed at zero by policy:
    /// `total = subtotal + shipping`.
    pub fn compute(lines: &[QuotedLine], policy: &PricingPolicy) -> Self {
        let currency = policy.currency;
        let subtotal: i64 = lines.iter().map(|l| l.line_total.minor).sum();
        let item_count: u32 = lines.iter().map(|l| l.quantity).sum();
        let shipping = policy.shipping_fee(item_count);
        Self {
            subtotal: Amount::from_minor(subtotal, currency),
            shipping_fee: Amount::from_minor(shipping, currency),
            total: Amount::from_minor(subtotal + shipping, currency),
            item_count,
        }
    }
}

/// A cart read: priced lines, their computed totals, and any carted refs
/// the catalog no longer sells. Unavailable refs are excluded from the
/// totals so the cart stays readable while the customer resolves them.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub lines: Vec<QuotedLine>,
    pub quote: PriceQuote,
    pub unavailable: Vec<String>,
}

/// Live product data the cart needs from the catalog collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_ref: String,
    pub name: String,
    pub unit_price: Amount,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Read interface onto the product catalog. Catalog storage and admin CRUD
/// live elsewhere; the pipeline only ever asks for current product data.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch a product's current name and price
    async fn product(&self, product_ref: &str) -> CheckoutResult<ProductInfo>;
}

/// Durable per-owner cart storage.
///
/// Implementations must make each operation atomic: two concurrent
/// `set_quantity` calls for the same line may race (last write wins) but
/// must never corrupt the row.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Merge `quantity` into an existing line or create a new one.
    /// Fails with `InvalidQuantity` when `quantity` is zero.
    async fn add_line(&self, owner: &str, product_ref: &str, quantity: u32)
        -> CheckoutResult<CartLine>;

    /// Overwrite a line's quantity; zero removes the line. Fails with
    /// `CartLineNotFound` if the line is absent (callers needing upsert
    /// must `add_line` first). Returns the updated line, or `None` when
    /// the line was removed.
    async fn set_quantity(
        &self,
        owner: &str,
        product_ref: &str,
        quantity: u32,
    ) -> CheckoutResult<Option<CartLine>>;

    /// Remove a line; idempotent, no error if already absent
    async fn remove_line(&self, owner: &str, product_ref: &str) -> CheckoutResult<()>;

    /// All lines for an owner
    async fn lines(&self, owner: &str) -> CheckoutResult<Vec<CartLine>>;

    /// Delete all lines for an owner
    async fn clear(&self, owner: &str) -> CheckoutResult<()>;
}

/// In-process cart store. A single lock per store makes every operation an
/// atomic upsert; a database-backed implementation plugs in at the same
/// trait with a unique index on (owner, product).
#[derive(Default)]
pub struct MemoryCartStore {
    lines: Mutex<HashMap<(String, String), u32>>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), u32>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn add_line(
        &self,
        owner: &str,
        product_ref: &str,
        quantity: u32,
    ) -> CheckoutResult<CartLine> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { quantity: 0 });
        }
        let mut lines = self.locked();
        let entry = lines
            .entry((owner.to_string(), product_ref.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(quantity);
        Ok(CartLine {
            owner_id: owner.to_string(),
            product_ref: product_ref.to_string(),
            quantity: *entry,
        })
    }

    async fn set_quantity(
        &self,
        owner: &str,
        product_ref: &str,
        quantity: u32,
    ) -> CheckoutResult<Option<CartLine>> {
        let key = (owner.to_string(), product_ref.to_string());
        let mut lines = self.locked();
        if !lines.contains_key(&key) {
            return Err(CheckoutError::CartLineNotFound {
                product_ref: product_ref.to_string(),
            });
        }
        if quantity == 0 {
            lines.remove(&key);
            return Ok(None);
        }
        lines.insert(key, quantity);
        Ok(Some(CartLine {
            owner_id: owner.to_string(),
            product_ref: product_ref.to_string(),
            quantity,
        }))
    }

    async fn remove_line(&self, owner: &str, product_ref: &str) -> CheckoutResult<()> {
        self.locked()
            .remove(&(owner.to_string(), product_ref.to_string()));
        Ok(())
    }

    async fn lines(&self, owner: &str) -> CheckoutResult<Vec<CartLine>> {
        let lines = self.locked();
        let mut out: Vec<CartLine> = lines
            .iter()
            .filter(|((o, _), _)| o == owner)
            .map(|((o, p), q)| CartLine {
                owner_id: o.clone(),
                product_ref: p.clone(),
                quantity: *q,
            })
            .collect();
        out.sort_by(|a, b| a.product_ref.cmp(&b.product_ref));
        Ok(out)
    }

    async fn clear(&self, owner: &str) -> CheckoutResult<()> {
        self.locked().retain(|(o, _), _| o != owner);
        Ok(())
    }
}

/// Catalog backed by a static product list, loadable from
/// `config/products.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    pub products: Vec<CatalogEntry>,
}

/// One product row in the catalog config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub product_ref: String,
    pub name: String,
    /// Price in major units of the quote currency (EUR)
    pub price: f64,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from TOML (the `config/products.toml` format)
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn product(&self, product_ref: &str) -> CheckoutResult<ProductInfo> {
        let entry = self
            .products
            .iter()
            .find(|p| p.product_ref == product_ref)
            .ok_or_else(|| CheckoutError::ProductNotFound {
                product_ref: product_ref.to_string(),
            })?;
        if !entry.active {
            return Err(CheckoutError::ProductUnavailable {
                product_ref: product_ref.to_string(),
            });
        }
        Ok(ProductInfo {
            product_ref: entry.product_ref.clone(),
            name: entry.name.clone(),
            unit_price: Amount::from_major(entry.price, Currency::EUR),
            active: entry.active,
        })
    }
}
