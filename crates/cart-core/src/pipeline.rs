//! # Checkout Pipeline
//!
//! Orchestration of the cart-to-order flow: quote, session creation,
//! payment confirmation, order materialization, and invoice issuance.
//!
//! The pipeline owns no state of its own; it coordinates the cart store,
//! the product catalog, the order store, and the payment processor through
//! their trait seams. Suspension points are strictly the external calls;
//! no locks are held across them.

use crate::cart::{CartStore, CartView, PriceQuote, ProductCatalog, QuotedLine};
use crate::error::{CheckoutError, CheckoutResult};
use crate::notify::{Notifier, OrderNotification};
use crate::order::{IssuanceClaim, Order, OrderStatus, OrderStore, SessionInsert};
use crate::pricing::PricingPolicy;
use crate::processor::{
    EphemeralProductSpec, InvoiceDoc, InvoiceLine, PaymentProcessor,
};
use crate::session::{CartSnapshot, CheckoutSession};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Success/cancel redirect targets handed to the processor
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the storefront (e.g., "https://ceramika.shop")
    pub base_url: String,
    pub success_path: String,
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            success_path: "/checkout/success".to_string(),
            cancel_path: "/checkout/cancel".to_string(),
        }
    }

    /// Success target with the processor's session-id placeholder; the
    /// redirect parameter is only ever a lookup key, never trusted data.
    pub fn success_url(&self) -> String {
        format!(
            "{}{}?session_id={{CHECKOUT_SESSION_ID}}",
            self.base_url, self.success_path
        )
    }

    /// Cancel target carrying the ephemeral product ref for best-effort cleanup
    pub fn cancel_url(&self, ephemeral_product_ref: &str) -> String {
        format!(
            "{}{}?product_ref={}",
            self.base_url, self.cancel_path, ephemeral_product_ref
        )
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// The checkout pipeline
#[derive(Clone)]
pub struct CheckoutPipeline {
    cart: Arc<dyn CartStore>,
    catalog: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderStore>,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    policy: PricingPolicy,
    urls: CheckoutUrls,
}

impl CheckoutPipeline {
    pub fn new(
        cart: Arc<dyn CartStore>,
        catalog: Arc<dyn ProductCatalog>,
        orders: Arc<dyn OrderStore>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn Notifier>,
        policy: PricingPolicy,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            cart,
            catalog,
            orders,
            processor,
            notifier,
            policy,
            urls,
        }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------
    // Cart operations
    // ------------------------------------------------------------------

    /// Add a product to the cart after validating it against the catalog
    pub async fn add_to_cart(
        &self,
        owner: &str,
        product_ref: &str,
        quantity: u32,
    ) -> CheckoutResult<()> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { quantity: 0 });
        }
        // Validates existence and availability; the price itself is not
        // stored, it is re-read at quote time.
        self.catalog.product(product_ref).await?;
        self.cart.add_line(owner, product_ref, quantity).await?;
        Ok(())
    }

    /// Overwrite a line's quantity; zero removes the line
    pub async fn set_quantity(
        &self,
        owner: &str,
        product_ref: &str,
        quantity: u32,
    ) -> CheckoutResult<()> {
        self.cart.set_quantity(owner, product_ref, quantity).await?;
        Ok(())
    }

    /// Remove a line; idempotent
    pub async fn remove_line(&self, owner: &str, product_ref: &str) -> CheckoutResult<()> {
        self.cart.remove_line(owner, product_ref).await
    }

    /// Explicitly empty the cart
    pub async fn clear_cart(&self, owner: &str) -> CheckoutResult<()> {
        self.cart.clear(owner).await
    }

    /// Read the cart with live prices and computed totals. Recomputed on
    /// every call; a quote is never cached across a mutation.
    ///
    /// A carted product the catalog no longer sells does not fail the read:
    /// the ref is reported in `unavailable` and excluded from the totals,
    /// so the customer can still see and edit the rest of the cart.
    pub async fn quote(&self, owner: &str) -> CheckoutResult<CartView> {
        let lines = self.cart.lines(owner).await?;
        let mut quoted = Vec::with_capacity(lines.len());
        let mut unavailable = Vec::new();
        for line in &lines {
            let product = match self.catalog.product(&line.product_ref).await {
                Ok(product) => product,
                Err(
                    CheckoutError::ProductNotFound { product_ref }
                    | CheckoutError::ProductUnavailable { product_ref },
                ) => {
                    unavailable.push(product_ref);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let line_total = product.unit_price.minor * line.quantity as i64;
            quoted.push(QuotedLine {
                product_ref: product.product_ref,
                name: product.name,
                unit_price: product.unit_price,
                quantity: line.quantity,
                line_total: crate::money::Amount::from_minor(line_total, self.policy.currency),
            });
        }
        let quote = PriceQuote::compute(&quoted, &self.policy);
        Ok(CartView {
            lines: quoted,
            quote,
            unavailable,
        })
    }

    // ------------------------------------------------------------------
    // Checkout session builder
    // ------------------------------------------------------------------

    /// Snapshot the cart and create a hosted checkout session.
    ///
    /// Validation (empty cart, minimum order) runs before any external call.
    /// The snapshot and the settlement amount are frozen here; later cart
    /// edits never touch this session.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn begin_checkout(
        &self,
        owner: &str,
        customer_email: Option<&str>,
    ) -> CheckoutResult<CheckoutSession> {
        let view = self.quote(owner).await?;
        // Checkout refuses while any carted line is no longer purchasable;
        // reading the cart tolerates it, paying for it must not.
        if let Some(product_ref) = view.unavailable.first() {
            return Err(CheckoutError::ProductUnavailable {
                product_ref: product_ref.clone(),
            });
        }
        let CartView { lines, quote, .. } = view;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        self.policy.enforce_minimum(quote.total.minor)?;

        let settlement_minor = self.policy.settle_minor(quote.total.minor);
        let snapshot = CartSnapshot::freeze(
            owner,
            &lines,
            &quote,
            settlement_minor,
            self.policy.settlement_currency,
        );

        // One synthetic SKU per checkout: the processor models checkout
        // around catalog products, so the whole cart becomes one product.
        let spec = EphemeralProductSpec {
            name: snapshot.product_name(),
            description: snapshot.describe(),
            price_minor: settlement_minor,
            currency: self.policy.settlement_currency,
        };
        let product_ref = self.processor.create_ephemeral_product(&spec).await?;

        let mut metadata = snapshot.to_metadata()?;
        metadata.insert("ephemeral_product_ref".to_string(), product_ref.clone());

        let success_url = self.urls.success_url();
        let cancel_url = self.urls.cancel_url(&product_ref);
        let created = self
            .processor
            .create_session(
                &product_ref,
                &success_url,
                &cancel_url,
                customer_email,
                &metadata,
            )
            .await?;

        info!(
            "Created checkout session: id={}, total={}, settlement={} {}",
            created.session_id,
            quote.total.display(),
            settlement_minor,
            self.policy.settlement_currency,
        );

        Ok(CheckoutSession {
            session_id: created.session_id,
            owner_id: owner.to_string(),
            checkout_url: created.checkout_url,
            ephemeral_product_ref: product_ref,
            snapshot,
            success_url,
            cancel_url,
            created_at: Utc::now(),
        })
    }

    // ------------------------------------------------------------------
    // Payment confirmation and order materialization
    // ------------------------------------------------------------------

    /// Confirm payment for a session and materialize the order exactly once.
    ///
    /// Reached from the success redirect and from the webhook; both paths
    /// converge here. The session id is only a lookup key: amount and status
    /// are re-fetched from the processor, never read from the caller.
    /// Replays (tab refresh, duplicate webhook delivery) return the already
    /// materialized order unchanged.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn confirm(&self, session_id: &str) -> CheckoutResult<Order> {
        let state = self.processor.fetch_session(session_id).await?;

        if !state.status.is_paid() {
            return Err(CheckoutError::PaymentIncomplete {
                session_id: session_id.to_string(),
                status: state.status.as_str().to_string(),
            });
        }

        let snapshot = CartSnapshot::from_metadata(&state.metadata)?;

        // The snapshot stays authoritative for order totals; a captured
        // amount that disagrees with it is logged for reconciliation.
        if let Some(amount) = state.amount_minor {
            if amount != snapshot.settlement_minor {
                warn!(
                    "Settlement mismatch for session {}: captured {} vs frozen {}",
                    session_id, amount, snapshot.settlement_minor
                );
            }
        }

        let order = Order::from_snapshot(session_id, &snapshot, state.customer_email);
        match self.orders.insert_if_absent(order).await? {
            SessionInsert::Existing(existing) => {
                info!(
                    "Session {} already materialized as order {}",
                    session_id, existing.id
                );
                Ok(existing)
            }
            SessionInsert::Created(created) => {
                // Best-effort: a failure to clear must not fail the
                // materialization; the cart inconsistency is a UX matter,
                // never a financial one.
                if let Err(e) = self.cart.clear(&created.owner_id).await {
                    warn!(
                        "Failed to clear cart for {} after order {}: {}",
                        created.owner_id, created.id, e
                    );
                }
                self.notifier
                    .order_confirmed(&OrderNotification::for_order(&created));
                info!(
                    "Materialized order {} for session {} (total {})",
                    created.id,
                    session_id,
                    created.total.display()
                );
                Ok(created)
            }
        }
    }

    /// Advisory cleanup of the ephemeral product after a cancelled checkout.
    /// The processor owns session expiry; a failure here is only logged.
    pub async fn cancel_cleanup(&self, ephemeral_product_ref: &str) {
        match self.processor.delete_product(ephemeral_product_ref).await {
            Ok(()) => info!("Removed ephemeral product {}", ephemeral_product_ref),
            Err(e) => warn!(
                "Could not remove ephemeral product {}: {}",
                ephemeral_product_ref, e
            ),
        }
    }

    // ------------------------------------------------------------------
    // Invoice issuance
    // ------------------------------------------------------------------

    /// Issue a processor-hosted invoice for a paid order.
    ///
    /// Idempotent: an already-issued invoice is fetched and returned. The
    /// order store admits a single issuer at a time, so concurrent requests
    /// cannot both create an invoice: the loser is told the issuance is in
    /// progress and retries. The invoice reference is persisted only after
    /// every step succeeds, so a half-created invoice is never linked to
    /// the order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn issue_invoice(
        &self,
        order_id: &str,
        email_override: Option<&str>,
        customer_name: Option<&str>,
    ) -> CheckoutResult<InvoiceDoc> {
        let order = self.orders.get(order_id).await?;

        if order.status != OrderStatus::Paid {
            return Err(CheckoutError::InvalidOrderState {
                order_id: order_id.to_string(),
                status: order.status.to_string(),
                expected: OrderStatus::Paid.to_string(),
            });
        }

        match self.orders.claim_invoice_issuance(order_id).await? {
            IssuanceClaim::Issued(invoice_ref) => self.processor.fetch_invoice(&invoice_ref).await,
            IssuanceClaim::Busy => Err(CheckoutError::InvoiceIssuanceInProgress {
                order_id: order_id.to_string(),
            }),
            IssuanceClaim::Claimed => {
                let result = self
                    .run_issuance(&order, email_override, customer_name)
                    .await;
                if result.is_err() {
                    // A failed attempt releases the claim so a retry can run
                    if let Err(e) = self.orders.release_invoice_claim(order_id).await {
                        warn!("Could not release invoice claim for {}: {}", order_id, e);
                    }
                }
                result
            }
        }
    }

    /// The issuance steps proper, run only by the claim holder. Persisting
    /// the invoice reference releases the claim.
    async fn run_issuance(
        &self,
        order: &Order,
        email_override: Option<&str>,
        customer_name: Option<&str>,
    ) -> CheckoutResult<InvoiceDoc> {
        let order_id = order.id.as_str();
        let email = email_override
            .map(String::from)
            .or_else(|| order.customer_email.clone())
            .ok_or_else(|| CheckoutError::InvoiceIssuanceFailed {
                detail: format!("no customer email on order {}", order_id),
            })?;
        let name = customer_name.unwrap_or(&email);

        let customer_ref = self.processor.find_or_create_customer(&email, name).await?;

        let mut lines: Vec<InvoiceLine> = order
            .line_items
            .iter()
            .map(|item| InvoiceLine {
                description: item.name.clone(),
                unit_price_minor: item.unit_price.minor,
                quantity: item.quantity,
            })
            .collect();
        if order.shipping.minor > 0 {
            lines.push(InvoiceLine {
                description: "Shipping".to_string(),
                unit_price_minor: order.shipping.minor,
                quantity: 1,
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("order_id".to_string(), order.id.clone());
        metadata.insert("order_source".to_string(), "ceramika_storefront".to_string());

        let invoice_ref = self
            .processor
            .create_invoice(&customer_ref, &lines, &metadata)
            .await?;
        self.processor.finalize_invoice(&invoice_ref).await?;
        self.processor.send_invoice(&invoice_ref).await?;
        let doc = self.processor.fetch_invoice(&invoice_ref).await?;

        self.orders
            .set_invoice_ref(order_id, Some(&invoice_ref))
            .await?;

        self.notifier.invoice_issued(
            &OrderNotification::for_order(order)
                .with_invoice_urls(doc.hosted_url.clone(), doc.pdf_url.clone()),
        );
        info!("Issued invoice {} for order {}", invoice_ref, order_id);

        Ok(doc)
    }

    /// Fetch the invoice already issued for an order
    pub async fn fetch_invoice_for(&self, order_id: &str) -> CheckoutResult<InvoiceDoc> {
        let order = self.orders.get(order_id).await?;
        let invoice_ref =
            order
                .invoice_ref
                .as_deref()
                .ok_or_else(|| CheckoutError::InvoiceNotFound {
                    order_id: order_id.to_string(),
                })?;
        self.processor.fetch_invoice(invoice_ref).await
    }

    /// Void an issued invoice and unlink it, allowing re-generation
    pub async fn void_invoice_for(&self, order_id: &str) -> CheckoutResult<()> {
        let order = self.orders.get(order_id).await?;
        let invoice_ref =
            order
                .invoice_ref
                .as_deref()
                .ok_or_else(|| CheckoutError::InvoiceNotFound {
                    order_id: order_id.to_string(),
                })?;
        self.processor.void_invoice(invoice_ref).await?;
        self.orders.set_invoice_ref(order_id, None).await
    }

    /// Fetch an order by id
    pub async fn order(&self, order_id: &str) -> CheckoutResult<Order> {
        self.orders.get(order_id).await
    }

    /// All orders for an owner, newest first
    pub async fn orders_for(&self, owner_id: &str) -> CheckoutResult<Vec<Order>> {
        self.orders.for_owner(owner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{MemoryCartStore, ProductInfo, StaticCatalog};
    use crate::money::Currency;
    use crate::notify::LoggingNotifier;
    use crate::order::MemoryOrderStore;
    use crate::processor::{CreatedSession, PaymentStatus, SessionState};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Catalog double whose products can be retired mid-test
    struct TogglingCatalog {
        inner: StaticCatalog,
        disabled: Mutex<HashSet<String>>,
    }

    #[async_trait::async_trait]
    impl ProductCatalog for TogglingCatalog {
        async fn product(&self, product_ref: &str) -> CheckoutResult<ProductInfo> {
            if self.disabled.lock().unwrap().contains(product_ref) {
                return Err(CheckoutError::ProductUnavailable {
                    product_ref: product_ref.to_string(),
                });
            }
            self.inner.product(product_ref).await
        }
    }

    /// Processor double: records created products/sessions and serves the
    /// captured metadata back from fetch_session.
    #[derive(Default)]
    struct MockProcessor {
        product_calls: AtomicUsize,
        session_calls: AtomicUsize,
        invoice_calls: AtomicUsize,
        fail_finalize: bool,
        customer_delay_ms: u64,
        report_status: Mutex<PaymentStatus>,
        products: Mutex<Vec<EphemeralProductSpec>>,
        sessions: Mutex<HashMap<String, HashMap<String, String>>>,
        deleted: Mutex<Vec<String>>,
    }

    impl MockProcessor {
        fn paying() -> Self {
            Self {
                report_status: Mutex::new(PaymentStatus::Paid),
                ..Self::default()
            }
        }

        fn with_status(status: PaymentStatus) -> Self {
            Self {
                report_status: Mutex::new(status),
                ..Self::default()
            }
        }

        fn registered_price(&self) -> i64 {
            self.products.lock().unwrap()[0].price_minor
        }
    }

    #[async_trait::async_trait]
    impl PaymentProcessor for MockProcessor {
        async fn create_ephemeral_product(
            &self,
            spec: &EphemeralProductSpec,
        ) -> CheckoutResult<String> {
            let n = self.product_calls.fetch_add(1, Ordering::SeqCst);
            self.products.lock().unwrap().push(spec.clone());
            Ok(format!("prod_{}", n))
        }

        async fn delete_product(&self, product_ref: &str) -> CheckoutResult<()> {
            self.deleted.lock().unwrap().push(product_ref.to_string());
            Ok(())
        }

        async fn create_session(
            &self,
            _product_ref: &str,
            _success_url: &str,
            _cancel_url: &str,
            _customer_email: Option<&str>,
            metadata: &HashMap<String, String>,
        ) -> CheckoutResult<CreatedSession> {
            let n = self.session_calls.fetch_add(1, Ordering::SeqCst);
            let session_id = format!("cs_{}", n);
            self.sessions
                .lock()
                .unwrap()
                .insert(session_id.clone(), metadata.clone());
            Ok(CreatedSession {
                session_id,
                checkout_url: "https://pay.example.com/cs".to_string(),
            })
        }

        async fn fetch_session(&self, session_id: &str) -> CheckoutResult<SessionState> {
            let metadata = self
                .sessions
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .ok_or_else(|| CheckoutError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            let amount = metadata
                .get("settlement_amount")
                .and_then(|v| v.parse().ok());
            Ok(SessionState {
                session_id: session_id.to_string(),
                status: *self.report_status.lock().unwrap(),
                amount_minor: amount,
                currency: Some(Currency::USD),
                customer_email: Some("alice@example.com".to_string()),
                metadata,
            })
        }

        async fn find_or_create_customer(
            &self,
            _email: &str,
            _name: &str,
        ) -> CheckoutResult<String> {
            if self.customer_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.customer_delay_ms))
                    .await;
            }
            Ok("cus_1".to_string())
        }

        async fn create_invoice(
            &self,
            _customer_ref: &str,
            _lines: &[InvoiceLine],
            _metadata: &HashMap<String, String>,
        ) -> CheckoutResult<String> {
            self.invoice_calls.fetch_add(1, Ordering::SeqCst);
            Ok("in_1".to_string())
        }

        async fn finalize_invoice(&self, _invoice_ref: &str) -> CheckoutResult<()> {
            if self.fail_finalize {
                return Err(CheckoutError::InvoiceIssuanceFailed {
                    detail: "finalize rejected".to_string(),
                });
            }
            Ok(())
        }

        async fn send_invoice(&self, _invoice_ref: &str) -> CheckoutResult<()> {
            Ok(())
        }

        async fn fetch_invoice(&self, invoice_ref: &str) -> CheckoutResult<InvoiceDoc> {
            Ok(InvoiceDoc {
                id: invoice_ref.to_string(),
                hosted_url: "https://pay.example.com/in".to_string(),
                pdf_url: "https://pay.example.com/in.pdf".to_string(),
                status: "open".to_string(),
            })
        }

        async fn void_invoice(&self, _invoice_ref: &str) -> CheckoutResult<()> {
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::from_toml(
            r#"
            [[products]]
            product_ref = "vase-bleu"
            name = "Vase bleu"
            price = 10.00

            [[products]]
            product_ref = "petit-bol"
            name = "Petit bol"
            price = 4.59
            "#,
        )
        .unwrap()
    }

    fn policy() -> PricingPolicy {
        PricingPolicy {
            minimum_order_minor: 500,
            settlement_rate: 1.08,
            ..PricingPolicy::default()
        }
    }

    fn pipeline(processor: Arc<MockProcessor>) -> CheckoutPipeline {
        CheckoutPipeline::new(
            Arc::new(MemoryCartStore::new()),
            Arc::new(catalog()),
            Arc::new(MemoryOrderStore::new()),
            processor,
            Arc::new(LoggingNotifier),
            policy(),
            CheckoutUrls::new("https://ceramika.shop"),
        )
    }

    #[tokio::test]
    async fn test_happy_path() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor.clone());

        pipeline.add_to_cart("alice", "vase-bleu", 2).await.unwrap();

        let view = pipeline.quote("alice").await.unwrap();
        assert_eq!(view.quote.subtotal.minor, 2000);
        assert_eq!(view.quote.shipping_fee.minor, 80);
        assert_eq!(view.quote.total.minor, 2080);

        let session = pipeline
            .begin_checkout("alice", Some("alice@example.com"))
            .await
            .unwrap();
        // 20.80 EUR at 1.08 -> 22.464 USD -> 2246 cents
        assert_eq!(session.snapshot.settlement_minor, 2246);
        assert_eq!(processor.registered_price(), 2246);

        let order = pipeline.confirm(&session.session_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.subtotal.minor, 2000);
        assert_eq!(order.shipping.minor, 80);
        assert_eq!(order.total.minor, 2080);
        assert_eq!(order.customer_email.as_deref(), Some("alice@example.com"));

        // Cart cleared on materialization
        let view = pipeline.quote("alice").await.unwrap();
        assert!(view.lines.is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_replay_returns_same_order() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor);

        pipeline.add_to_cart("alice", "vase-bleu", 1).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();

        let first = pipeline.confirm(&session.session_id).await.unwrap();
        let second = pipeline.confirm(&session.session_id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(pipeline.orders_for("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_below_minimum_rejected_before_any_external_call() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor.clone());

        // 4.59 + 0.40 shipping = 4.99, one cent below the 5.00 minimum
        pipeline.add_to_cart("alice", "petit-bol", 1).await.unwrap();

        let err = pipeline.begin_checkout("alice", None).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::BelowMinimumOrder {
                total: 499,
                minimum: 500
            }
        ));
        assert_eq!(processor.product_calls.load(Ordering::SeqCst), 0);
        assert_eq!(processor.session_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor);

        let err = pipeline.begin_checkout("alice", None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
    }

    #[tokio::test]
    async fn test_snapshot_immutable_after_cart_mutation() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor.clone());

        pipeline.add_to_cart("alice", "vase-bleu", 2).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();
        let registered = processor.registered_price();

        // Mutate the cart after session creation
        pipeline.set_quantity("alice", "vase-bleu", 5).await.unwrap();

        // The settlement amount registered with the processor is unchanged
        assert_eq!(processor.registered_price(), registered);

        // Materialization uses the snapshot, not the mutated cart
        let order = pipeline.confirm(&session.session_id).await.unwrap();
        assert_eq!(order.total.minor, 2080);
        assert_eq!(order.line_items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_unpaid_session_is_not_materialized() {
        let processor = Arc::new(MockProcessor::with_status(PaymentStatus::Open));
        let pipeline = pipeline(processor);

        pipeline.add_to_cart("alice", "vase-bleu", 1).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();

        let err = pipeline.confirm(&session.session_id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentIncomplete { .. }));
        assert!(pipeline.orders_for("alice").await.unwrap().is_empty());

        // The cart survives a failed confirmation
        let view = pipeline.quote("alice").await.unwrap();
        assert_eq!(view.lines.len(), 1);
    }

    #[tokio::test]
    async fn test_invoice_issuance_is_idempotent() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor.clone());

        pipeline.add_to_cart("alice", "vase-bleu", 1).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();
        let order = pipeline.confirm(&session.session_id).await.unwrap();

        let first = pipeline.issue_invoice(&order.id, None, None).await.unwrap();
        let second = pipeline.issue_invoice(&order.id, None, None).await.unwrap();

        assert_eq!(first.id, second.id);
        // The second call fetched the existing invoice instead of creating one
        assert_eq!(processor.invoice_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            pipeline.order(&order.id).await.unwrap().invoice_ref.as_deref(),
            Some("in_1")
        );
    }

    #[tokio::test]
    async fn test_failed_invoice_leaves_no_reference() {
        let processor = Arc::new(MockProcessor {
            fail_finalize: true,
            report_status: Mutex::new(PaymentStatus::Paid),
            ..MockProcessor::default()
        });
        let pipeline = pipeline(processor);

        pipeline.add_to_cart("alice", "vase-bleu", 1).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();
        let order = pipeline.confirm(&session.session_id).await.unwrap();

        let err = pipeline.issue_invoice(&order.id, None, None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvoiceIssuanceFailed { .. }));

        // All-or-nothing: no partial invoice reference, order still Paid
        let fetched = pipeline.order(&order.id).await.unwrap();
        assert!(fetched.invoice_ref.is_none());
        assert_eq!(fetched.status, OrderStatus::Paid);

        // The failure released the issuance claim: a retry reaches the
        // processor again instead of being told an issuance is running
        let err = pipeline.issue_invoice(&order.id, None, None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvoiceIssuanceFailed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_issuance_creates_one_invoice() {
        let processor = Arc::new(MockProcessor {
            customer_delay_ms: 50,
            report_status: Mutex::new(PaymentStatus::Paid),
            ..MockProcessor::default()
        });
        let pipeline = pipeline(processor.clone());

        pipeline.add_to_cart("alice", "vase-bleu", 1).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();
        let order = pipeline.confirm(&session.session_id).await.unwrap();

        // Two simultaneous requests: one holds the claim through the slow
        // customer lookup, the other must not start a second issuance
        let (first, second) = tokio::join!(
            pipeline.issue_invoice(&order.id, None, None),
            pipeline.issue_invoice(&order.id, None, None),
        );

        let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = if first.is_err() {
            first.unwrap_err()
        } else {
            second.unwrap_err()
        };
        assert!(matches!(
            loser,
            CheckoutError::InvoiceIssuanceInProgress { .. }
        ));
        assert_eq!(processor.invoice_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            pipeline.order(&order.id).await.unwrap().invoice_ref.as_deref(),
            Some("in_1")
        );

        // Once the winner persisted the ref, a retry fetches that invoice
        let retried = pipeline.issue_invoice(&order.id, None, None).await.unwrap();
        assert_eq!(retried.id, "in_1");
        assert_eq!(processor.invoice_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retired_product_flags_line_without_failing_cart() {
        let catalog = Arc::new(TogglingCatalog {
            inner: catalog(),
            disabled: Mutex::new(HashSet::new()),
        });
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = CheckoutPipeline::new(
            Arc::new(MemoryCartStore::new()),
            catalog.clone(),
            Arc::new(MemoryOrderStore::new()),
            processor,
            Arc::new(LoggingNotifier),
            policy(),
            CheckoutUrls::new("https://ceramika.shop"),
        );

        pipeline.add_to_cart("alice", "vase-bleu", 2).await.unwrap();
        pipeline.add_to_cart("alice", "petit-bol", 1).await.unwrap();

        // The bowl is retired after it was carted
        catalog
            .disabled
            .lock()
            .unwrap()
            .insert("petit-bol".to_string());

        // Reading the cart still works: the retired line is flagged and
        // left out of the totals
        let view = pipeline.quote("alice").await.unwrap();
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].product_ref, "vase-bleu");
        assert_eq!(view.quote.subtotal.minor, 2000);
        assert_eq!(view.unavailable, vec!["petit-bol".to_string()]);

        // Checkout refuses until the line is resolved
        let err = pipeline.begin_checkout("alice", None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::ProductUnavailable { .. }));

        // Dropping the retired line unblocks checkout
        pipeline.remove_line("alice", "petit-bol").await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();
        assert_eq!(session.snapshot.total_minor, 2080);
    }

    #[tokio::test]
    async fn test_cancel_cleanup_deletes_ephemeral_product() {
        let processor = Arc::new(MockProcessor::paying());
        let pipeline = pipeline(processor.clone());

        pipeline.add_to_cart("alice", "vase-bleu", 1).await.unwrap();
        let session = pipeline.begin_checkout("alice", None).await.unwrap();

        pipeline.cancel_cleanup(&session.ephemeral_product_ref).await;
        assert_eq!(
            processor.deleted.lock().unwrap().as_slice(),
            &[session.ephemeral_product_ref.clone()]
        );
    }

    #[test]
    fn test_checkout_urls() {
        let urls = CheckoutUrls::new("https://ceramika.shop");
        assert_eq!(
            urls.success_url(),
            "https://ceramika.shop/checkout/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(
            urls.cancel_url("prod_1"),
            "https://ceramika.shop/checkout/cancel?product_ref=prod_1"
        );
    }
}
