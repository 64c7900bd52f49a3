//! # Polar API Client
//!
//! Implementation of the payment processor seam against the Polar REST API.
//! Checkout runs through hosted checkout sessions; invoices run through the
//! draft/finalize/send lifecycle.

use crate::config::PolarConfig;
use async_trait::async_trait;
use cart_core::{
    CheckoutError, CheckoutResult, CreatedSession, Currency, EphemeralProductSpec, InvoiceDoc,
    InvoiceLine, PaymentProcessor, PaymentStatus, SessionState,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info, instrument};

/// Polar payment processor
///
/// Uses Polar's hosted checkout page; card data never touches this system.
pub struct PolarProcessor {
    config: PolarConfig,
    client: Client,
}

impl PolarProcessor {
    /// Create a new Polar processor
    pub fn new(config: PolarConfig) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                CheckoutError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        let config = PolarConfig::from_env()?;
        Self::new(config)
    }

    pub fn config(&self) -> &PolarConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// POST a JSON body and return the raw response body on 2xx
    async fn post_json(&self, path: &str, body: &serde_json::Value) -> CheckoutResult<PolarReply> {
        let response = self
            .client
            .post(self.url(path))
            .header("Authorization", self.config.auth_header())
            .json(body)
            .send()
            .await
            .map_err(|e| CheckoutError::NetworkError(e.to_string()))?;
        PolarReply::read(response).await
    }

    async fn get(&self, path: &str) -> CheckoutResult<PolarReply> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", self.config.auth_header())
            .send()
            .await
            .map_err(|e| CheckoutError::NetworkError(e.to_string()))?;
        PolarReply::read(response).await
    }

    fn map_status(status: &str) -> CheckoutResult<PaymentStatus> {
        match status {
            "open" | "confirmed" => Ok(PaymentStatus::Open),
            "succeeded" | "paid" => Ok(PaymentStatus::Paid),
            "expired" => Ok(PaymentStatus::Expired),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" | "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(CheckoutError::PaymentVerificationFailed {
                detail: format!("unknown session status '{}'", other),
            }),
        }
    }
}

/// An HTTP reply with the status already read and the body buffered, so each
/// caller can map failures to its own error variant.
struct PolarReply {
    status: reqwest::StatusCode,
    body: String,
}

impl PolarReply {
    async fn read(response: reqwest::Response) -> CheckoutResult<Self> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CheckoutError::NetworkError(e.to_string()))?;
        Ok(Self { status, body })
    }

    fn is_success(&self) -> bool {
        self.status.is_success()
    }

    fn is_not_found(&self) -> bool {
        self.status == reqwest::StatusCode::NOT_FOUND
    }

    /// The processor's own error message, or the raw body if unparseable
    fn provider_message(&self) -> String {
        if let Ok(err) = serde_json::from_str::<PolarErrorResponse>(&self.body) {
            if let Some(detail) = err.detail.or(err.error) {
                return detail;
            }
        }
        format!("HTTP {}: {}", self.status, self.body)
    }

    fn parse<T: serde::de::DeserializeOwned>(&self) -> CheckoutResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            CheckoutError::Serialization(format!("Failed to parse Polar response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentProcessor for PolarProcessor {
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create_ephemeral_product(
        &self,
        spec: &EphemeralProductSpec,
    ) -> CheckoutResult<String> {
        let body = json!({
            "name": spec.name,
            "description": spec.description,
            "prices": [{
                "amount_type": "fixed",
                "price_amount": spec.price_minor,
                "price_currency": spec.currency.as_str(),
            }],
            "metadata": { "ephemeral": "true" },
        });

        let reply = self.post_json("/v1/products", &body).await?;
        if !reply.is_success() {
            error!(
                "Polar product creation failed: status={}, body={}",
                reply.status, reply.body
            );
            return Err(CheckoutError::CheckoutCreationFailed {
                detail: reply.provider_message(),
            });
        }

        let product: PolarIdResponse = reply.parse()?;
        debug!("Created ephemeral product: id={}", product.id);
        Ok(product.id)
    }

    async fn delete_product(&self, product_ref: &str) -> CheckoutResult<()> {
        // Polar archives products instead of deleting them
        let response = self
            .client
            .patch(self.url(&format!("/v1/products/{}", product_ref)))
            .header("Authorization", self.config.auth_header())
            .json(&json!({ "is_archived": true }))
            .send()
            .await
            .map_err(|e| CheckoutError::NetworkError(e.to_string()))?;
        let reply = PolarReply::read(response).await?;
        if !reply.is_success() {
            return Err(CheckoutError::NetworkError(format!(
                "archiving product {} failed: {}",
                product_ref,
                reply.provider_message()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, metadata))]
    async fn create_session(
        &self,
        product_ref: &str,
        success_url: &str,
        cancel_url: &str,
        customer_email: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> CheckoutResult<CreatedSession> {
        let mut body = json!({
            "products": [product_ref],
            "success_url": success_url,
            "cancel_url": cancel_url,
            "metadata": metadata,
        });
        if let Some(email) = customer_email {
            body["customer_email"] = json!(email);
        }

        let reply = self.post_json("/v1/checkouts", &body).await?;
        if !reply.is_success() {
            error!(
                "Polar checkout creation failed: status={}, body={}",
                reply.status, reply.body
            );
            return Err(CheckoutError::CheckoutCreationFailed {
                detail: reply.provider_message(),
            });
        }

        let session: PolarCheckoutResponse = reply.parse()?;
        info!(
            "Created Polar checkout session: id={}, url={}",
            session.id, session.url
        );

        Ok(CreatedSession {
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_session(&self, session_id: &str) -> CheckoutResult<SessionState> {
        let reply = self.get(&format!("/v1/checkouts/{}", session_id)).await?;
        if reply.is_not_found() {
            return Err(CheckoutError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        if !reply.is_success() {
            return Err(CheckoutError::PaymentVerificationFailed {
                detail: reply.provider_message(),
            });
        }

        let session: PolarCheckoutState = reply.parse()?;
        let status = Self::map_status(&session.status)?;
        let currency = session.currency.as_deref().and_then(Currency::parse);

        Ok(SessionState {
            session_id: session.id,
            status,
            amount_minor: session.total_amount,
            currency,
            customer_email: session.customer_email,
            metadata: session.metadata,
        })
    }

    async fn find_or_create_customer(&self, email: &str, name: &str) -> CheckoutResult<String> {
        // The address goes through .query so reqwest percent-encodes it
        let response = self
            .client
            .get(self.url("/v1/customers"))
            .query(&[("email", email)])
            .header("Authorization", self.config.auth_header())
            .send()
            .await
            .map_err(|e| CheckoutError::NetworkError(e.to_string()))?;
        let reply = PolarReply::read(response).await?;
        if reply.is_success() {
            let page: PolarCustomerPage = reply.parse()?;
            if let Some(existing) = page.items.into_iter().next() {
                debug!("Reusing Polar customer {} for {}", existing.id, email);
                return Ok(existing.id);
            }
        }

        let reply = self
            .post_json("/v1/customers", &json!({ "email": email, "name": name }))
            .await?;
        if !reply.is_success() {
            return Err(CheckoutError::InvoiceIssuanceFailed {
                detail: reply.provider_message(),
            });
        }
        let customer: PolarIdResponse = reply.parse()?;
        info!("Created Polar customer {} for {}", customer.id, email);
        Ok(customer.id)
    }

    #[instrument(skip(self, lines, metadata))]
    async fn create_invoice(
        &self,
        customer_ref: &str,
        lines: &[InvoiceLine],
        metadata: &HashMap<String, String>,
    ) -> CheckoutResult<String> {
        let body = json!({
            "customer_id": customer_ref,
            "lines": lines
                .iter()
                .map(|l| json!({
                    "description": l.description,
                    "unit_amount": l.unit_price_minor,
                    "quantity": l.quantity,
                }))
                .collect::<Vec<_>>(),
            "metadata": metadata,
        });

        let reply = self.post_json("/v1/invoices", &body).await?;
        if !reply.is_success() {
            error!(
                "Polar invoice creation failed: status={}, body={}",
                reply.status, reply.body
            );
            return Err(CheckoutError::InvoiceIssuanceFailed {
                detail: reply.provider_message(),
            });
        }
        let invoice: PolarIdResponse = reply.parse()?;
        Ok(invoice.id)
    }

    async fn finalize_invoice(&self, invoice_ref: &str) -> CheckoutResult<()> {
        let reply = self
            .post_json(&format!("/v1/invoices/{}/finalize", invoice_ref), &json!({}))
            .await?;
        if !reply.is_success() {
            return Err(CheckoutError::InvoiceIssuanceFailed {
                detail: reply.provider_message(),
            });
        }
        Ok(())
    }

    async fn send_invoice(&self, invoice_ref: &str) -> CheckoutResult<()> {
        let reply = self
            .post_json(&format!("/v1/invoices/{}/send", invoice_ref), &json!({}))
            .await?;
        if !reply.is_success() {
            return Err(CheckoutError::InvoiceIssuanceFailed {
                detail: reply.provider_message(),
            });
        }
        Ok(())
    }

    async fn fetch_invoice(&self, invoice_ref: &str) -> CheckoutResult<InvoiceDoc> {
        let reply = self.get(&format!("/v1/invoices/{}", invoice_ref)).await?;
        if !reply.is_success() {
            return Err(CheckoutError::InvoiceIssuanceFailed {
                detail: reply.provider_message(),
            });
        }
        let invoice: PolarInvoiceResponse = reply.parse()?;
        Ok(InvoiceDoc {
            id: invoice.id,
            hosted_url: invoice.hosted_invoice_url,
            pdf_url: invoice.invoice_pdf,
            status: invoice.status,
        })
    }

    async fn void_invoice(&self, invoice_ref: &str) -> CheckoutResult<()> {
        let reply = self
            .post_json(&format!("/v1/invoices/{}/void", invoice_ref), &json!({}))
            .await?;
        if !reply.is_success() {
            return Err(CheckoutError::InvoiceIssuanceFailed {
                detail: reply.provider_message(),
            });
        }
        info!("Voided invoice {}", invoice_ref);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "polar"
    }
}

// =============================================================================
// Polar API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PolarIdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PolarCheckoutResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct PolarCheckoutState {
    id: String,
    status: String,
    #[serde(default)]
    total_amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PolarCustomerPage {
    #[serde(default)]
    items: Vec<PolarCustomer>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PolarCustomer {
    id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct PolarInvoiceResponse {
    id: String,
    hosted_invoice_url: String,
    invoice_pdf: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PolarErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error: Option<String>,
}
