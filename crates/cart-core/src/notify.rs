//! # Notification Seam
//!
//! The pipeline hands a data payload to the notification collaborator;
//! template rendering and delivery mechanics live outside this crate.

use crate::money::Amount;
use crate::order::{Order, OrderLineItem};
use serde::Serialize;
use tracing::info;

/// Everything a transactional email needs about a confirmed order
#[derive(Debug, Clone, Serialize)]
pub struct OrderNotification {
    pub order_id: String,
    pub owner_id: String,
    pub customer_email: Option<String>,
    pub line_items: Vec<OrderLineItem>,
    pub subtotal: Amount,
    pub shipping: Amount,
    pub total: Amount,
    pub invoice_hosted_url: Option<String>,
    pub invoice_pdf_url: Option<String>,
}

impl OrderNotification {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            owner_id: order.owner_id.clone(),
            customer_email: order.customer_email.clone(),
            line_items: order.line_items.clone(),
            subtotal: order.subtotal,
            shipping: order.shipping,
            total: order.total,
            invoice_hosted_url: None,
            invoice_pdf_url: None,
        }
    }

    pub fn with_invoice_urls(
        mut self,
        hosted_url: impl Into<String>,
        pdf_url: impl Into<String>,
    ) -> Self {
        self.invoice_hosted_url = Some(hosted_url.into());
        self.invoice_pdf_url = Some(pdf_url.into());
        self
    }
}

/// Notification collaborator. Failures here are logged by callers and never
/// affect payment correctness.
#[allow(unused_variables)]
pub trait Notifier: Send + Sync {
    /// Called once when an order is first materialized
    fn order_confirmed(&self, notification: &OrderNotification) {
        info!(
            "Order confirmed: id={}, total={}",
            notification.order_id,
            notification.total.display()
        );
    }

    /// Called when an invoice has been issued and sent
    fn invoice_issued(&self, notification: &OrderNotification) {
        info!(
            "Invoice issued: order={}, url={:?}",
            notification.order_id, notification.invoice_hosted_url
        );
    }
}

/// Default notifier: just logs the payloads
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {}
