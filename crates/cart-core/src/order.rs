//! # Order Types
//!
//! The persisted order aggregate and its storage seam. An order is created
//! exactly once per checkout session; the store enforces this with an
//! atomic insert keyed by session id, never a read-then-write.

use crate::error::{CheckoutError, CheckoutResult};
use crate::money::Amount;
use crate::session::CartSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Awaiting payment confirmation
    Pending,
    /// Payment confirmed; invoice issuance is metadata, not a transition
    Paid,
    /// Fulfillment workflow completed (out of scope here)
    Fulfilled,
    /// Session expired or abandoned; only reachable before Paid
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A line item on a persisted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_ref: String,
    pub name: String,
    /// Unit price at snapshot time
    pub unit_price: Amount,
    pub quantity: u32,
}

/// The persisted order aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub owner_id: String,
    /// Originating checkout session; unique across all orders
    pub session_id: String,
    pub status: OrderStatus,
    pub subtotal: Amount,
    pub shipping: Amount,
    pub total: Amount,
    pub line_items: Vec<OrderLineItem>,
    pub customer_email: Option<String>,
    /// Processor invoice reference, set only once issuance fully succeeds
    pub invoice_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a Paid order from a confirmed session's snapshot. Totals come
    /// from the snapshot, never from the live cart.
    pub fn from_snapshot(
        session_id: &str,
        snapshot: &CartSnapshot,
        customer_email: Option<String>,
    ) -> Self {
        let currency = snapshot.currency;
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: snapshot.owner_id.clone(),
            session_id: session_id.to_string(),
            status: OrderStatus::Paid,
            subtotal: Amount::from_minor(snapshot.subtotal_minor, currency),
            shipping: Amount::from_minor(snapshot.shipping_minor, currency),
            total: Amount::from_minor(snapshot.total_minor, currency),
            line_items: snapshot
                .lines
                .iter()
                .map(|l| OrderLineItem {
                    product_ref: l.product_ref.clone(),
                    name: l.name.clone(),
                    unit_price: Amount::from_minor(l.unit_price_minor, currency),
                    quantity: l.quantity,
                })
                .collect(),
            customer_email,
            invoice_ref: None,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an insert keyed by session id
#[derive(Debug, Clone)]
pub enum SessionInsert {
    /// First confirmation for this session
    Created(Order),
    /// An order already exists for this session; the idempotent path
    Existing(Order),
}

/// Outcome of attempting to claim invoice issuance for an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceClaim {
    /// No invoice exists and no issuance is running; the caller now owns
    /// the issuance and must either persist a ref or release the claim
    Claimed,
    /// An invoice reference is already persisted
    Issued(String),
    /// Another issuance attempt holds the claim
    Busy,
}

/// Durable order storage.
///
/// `insert_if_absent` and `claim_invoice_issuance` must be atomic at the
/// storage layer (unique index, compare-and-set, or equivalent): a plain
/// existence check followed by a separate write is a replay race.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert the order unless one already exists for its session id
    async fn insert_if_absent(&self, order: Order) -> CheckoutResult<SessionInsert>;

    /// Look up the order for a session id
    async fn find_by_session(&self, session_id: &str) -> CheckoutResult<Option<Order>>;

    /// Fetch an order by id
    async fn get(&self, order_id: &str) -> CheckoutResult<Order>;

    /// All orders for an owner, newest first
    async fn for_owner(&self, owner_id: &str) -> CheckoutResult<Vec<Order>>;

    /// Set or clear the invoice reference on an order. Releases any
    /// outstanding issuance claim.
    async fn set_invoice_ref(
        &self,
        order_id: &str,
        invoice_ref: Option<&str>,
    ) -> CheckoutResult<()>;

    /// Atomically claim the right to issue an invoice for an order.
    /// At most one caller holds the claim at a time.
    async fn claim_invoice_issuance(&self, order_id: &str) -> CheckoutResult<IssuanceClaim>;

    /// Release a claim after a failed issuance so it can be retried
    async fn release_invoice_claim(&self, order_id: &str) -> CheckoutResult<()>;
}

#[derive(Default)]
struct OrderMap {
    by_id: HashMap<String, Order>,
    by_session: HashMap<String, String>,
    issuing: HashSet<String>,
}

/// In-process order store. One lock covers both indices, so the
/// session-uniqueness check and the insert are a single atomic step.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<OrderMap>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, OrderMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_if_absent(&self, order: Order) -> CheckoutResult<SessionInsert> {
        let mut map = self.locked();
        if let Some(existing_id) = map.by_session.get(&order.session_id) {
            let existing = map
                .by_id
                .get(existing_id)
                .cloned()
                .ok_or_else(|| CheckoutError::Internal("order index out of sync".to_string()))?;
            return Ok(SessionInsert::Existing(existing));
        }
        map.by_session
            .insert(order.session_id.clone(), order.id.clone());
        map.by_id.insert(order.id.clone(), order.clone());
        Ok(SessionInsert::Created(order))
    }

    async fn find_by_session(&self, session_id: &str) -> CheckoutResult<Option<Order>> {
        let map = self.locked();
        Ok(map
            .by_session
            .get(session_id)
            .and_then(|id| map.by_id.get(id))
            .cloned())
    }

    async fn get(&self, order_id: &str) -> CheckoutResult<Order> {
        self.locked()
            .by_id
            .get(order_id)
            .cloned()
            .ok_or_else(|| CheckoutError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn for_owner(&self, owner_id: &str) -> CheckoutResult<Vec<Order>> {
        let map = self.locked();
        let mut orders: Vec<Order> = map
            .by_id
            .values()
            .filter(|o| o.owner_id == owner_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn set_invoice_ref(
        &self,
        order_id: &str,
        invoice_ref: Option<&str>,
    ) -> CheckoutResult<()> {
        let mut map = self.locked();
        let order = map
            .by_id
            .get_mut(order_id)
            .ok_or_else(|| CheckoutError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;
        order.invoice_ref = invoice_ref.map(String::from);
        map.issuing.remove(order_id);
        Ok(())
    }

    async fn claim_invoice_issuance(&self, order_id: &str) -> CheckoutResult<IssuanceClaim> {
        // One lock covers the ref check and the claim, so two racing
        // issuers can never both see "no invoice yet"
        let mut map = self.locked();
        let order = map
            .by_id
            .get(order_id)
            .ok_or_else(|| CheckoutError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;
        if let Some(ref invoice_ref) = order.invoice_ref {
            return Ok(IssuanceClaim::Issued(invoice_ref.clone()));
        }
        if !map.issuing.insert(order_id.to_string()) {
            return Ok(IssuanceClaim::Busy);
        }
        Ok(IssuanceClaim::Claimed)
    }

    async fn release_invoice_claim(&self, order_id: &str) -> CheckoutResult<()> {
        self.locked().issuing.remove(order_id);
        Ok(())
    }
}
