//! # Payment Processor Trait
//!
//! The seam between the checkout pipeline and the external payment
//! processor. The processor is authoritative for payment and invoice
//! lifecycle state; this system is authoritative for cart and order state.

use crate::error::CheckoutResult;
use crate::money::Currency;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Request to register a throwaway catalog entry representing a whole cart.
/// The processor's API models checkout around catalog products, not ad-hoc
/// carts, hence the indirection.
#[derive(Debug, Clone, Serialize)]
pub struct EphemeralProductSpec {
    pub name: String,
    pub description: String,
    /// Price in settlement minor units
    pub price_minor: i64,
    pub currency: Currency,
}

/// A newly created hosted checkout session
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// Payment state of a session as reported by the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Session created, awaiting payment
    Open,
    /// Payment completed successfully
    Paid,
    /// Session expired before payment
    Expired,
    /// Payment attempt failed
    Failed,
    /// Customer cancelled on the hosted page
    Cancelled,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Open
    }
}

impl PaymentStatus {
    pub fn is_paid(self) -> bool {
        matches!(self, PaymentStatus::Paid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Open => "open",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

/// Authoritative session state re-fetched from the processor. Redirect query
/// parameters are only ever used to pick which session to look up.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub status: PaymentStatus,
    /// Amount captured, in settlement minor units
    pub amount_minor: Option<i64>,
    pub currency: Option<Currency>,
    pub customer_email: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// One line on a processor-hosted invoice
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    pub description: String,
    /// Unit price in quote-currency minor units
    pub unit_price_minor: i64,
    pub quantity: u32,
}

/// A processor-hosted invoice document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDoc {
    pub id: String,
    pub hosted_url: String,
    pub pdf_url: String,
    pub status: String,
}

/// Operations this system consumes from the payment processor.
///
/// None of these are retried automatically: retrying a creation call blind
/// risks duplicate ephemeral resources, so the caller must re-initiate.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Register an ephemeral product; returns the processor's product ref
    async fn create_ephemeral_product(&self, spec: &EphemeralProductSpec)
        -> CheckoutResult<String>;

    /// Best-effort removal of an ephemeral product after a cancelled checkout
    async fn delete_product(&self, product_ref: &str) -> CheckoutResult<()>;

    /// Create a hosted checkout session for the given product
    async fn create_session(
        &self,
        product_ref: &str,
        success_url: &str,
        cancel_url: &str,
        customer_email: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> CheckoutResult<CreatedSession>;

    /// Re-fetch authoritative session state by id
    async fn fetch_session(&self, session_id: &str) -> CheckoutResult<SessionState>;

    /// Find a billing profile by email or create one
    async fn find_or_create_customer(&self, email: &str, name: &str) -> CheckoutResult<String>;

    /// Create a draft invoice with the given lines; returns the invoice ref
    async fn create_invoice(
        &self,
        customer_ref: &str,
        lines: &[InvoiceLine],
        metadata: &HashMap<String, String>,
    ) -> CheckoutResult<String>;

    /// Finalize a draft invoice
    async fn finalize_invoice(&self, invoice_ref: &str) -> CheckoutResult<()>;

    /// Ask the processor to email the invoice to the customer
    async fn send_invoice(&self, invoice_ref: &str) -> CheckoutResult<()>;

    /// Fetch an invoice's hosted/pdf URLs and status
    async fn fetch_invoice(&self, invoice_ref: &str) -> CheckoutResult<InvoiceDoc>;

    /// Void an issued invoice
    async fn void_invoice(&self, invoice_ref: &str) -> CheckoutResult<()>;

    /// Processor name, for logging
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared processor handle (dynamic dispatch)
pub type BoxedProcessor = Arc<dyn PaymentProcessor>;
