//! # Checkout Error Types
//!
//! Typed error handling for the checkout pipeline.
//! All operations return `Result<T, CheckoutError>`.

use thiserror::Error;

/// Core error type for all checkout operations
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Quantity must be at least 1 when adding a line
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    /// Checkout attempted with no lines in the cart
    #[error("Cart is empty")]
    EmptyCart,

    /// Order total is below the configured minimum (amounts in minor units)
    #[error("Order total {:.2} is below the minimum of {:.2}", *total as f64 / 100.0, *minimum as f64 / 100.0)]
    BelowMinimumOrder { total: i64, minimum: i64 },

    /// Product not found in catalog
    #[error("Product not found: {product_ref}")]
    ProductNotFound { product_ref: String },

    /// Product exists but is not currently purchasable
    #[error("Product is not available: {product_ref}")]
    ProductUnavailable { product_ref: String },

    /// Cart line absent for a set-quantity call
    #[error("Cart line not found: {product_ref}")]
    CartLineNotFound { product_ref: String },

    /// Order lookup miss
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// No invoice issued for the order yet
    #[error("No invoice found for order: {order_id}")]
    InvoiceNotFound { order_id: String },

    /// Session unknown to the processor
    #[error("Session not found or expired: {session_id}")]
    SessionNotFound { session_id: String },

    /// Operation requires a different order status
    #[error("Order {order_id} is in state {status}, expected {expected}")]
    InvalidOrderState {
        order_id: String,
        status: String,
        expected: String,
    },

    /// Checkout session creation failed; detail carries the processor's payload
    #[error("Checkout creation failed: {detail}")]
    CheckoutCreationFailed { detail: String },

    /// Re-fetching authoritative payment state failed
    #[error("Payment verification failed: {detail}")]
    PaymentVerificationFailed { detail: String },

    /// Session exists but payment is not in a completed state
    #[error("Payment not completed for session {session_id} (status: {status})")]
    PaymentIncomplete { session_id: String, status: String },

    /// Invoice issuance failed; detail carries the processor's payload
    #[error("Invoice issuance failed: {detail}")]
    InvoiceIssuanceFailed { detail: String },

    /// A concurrent issuance attempt for this order is still running
    #[error("Invoice issuance already in progress for order {order_id}")]
    InvoiceIssuanceInProgress { order_id: String },

    /// Network/HTTP error communicating with the processor
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::Configuration(_) => 500,
            CheckoutError::InvalidQuantity { .. } => 400,
            CheckoutError::EmptyCart => 400,
            CheckoutError::BelowMinimumOrder { .. } => 400,
            CheckoutError::ProductNotFound { .. } => 404,
            CheckoutError::ProductUnavailable { .. } => 400,
            CheckoutError::CartLineNotFound { .. } => 404,
            CheckoutError::OrderNotFound { .. } => 404,
            CheckoutError::InvoiceNotFound { .. } => 404,
            CheckoutError::SessionNotFound { .. } => 404,
            CheckoutError::InvalidOrderState { .. } => 409,
            CheckoutError::CheckoutCreationFailed { .. } => 502,
            CheckoutError::PaymentVerificationFailed { .. } => 502,
            CheckoutError::PaymentIncomplete { .. } => 402,
            CheckoutError::InvoiceIssuanceFailed { .. } => 502,
            CheckoutError::InvoiceIssuanceInProgress { .. } => 409,
            CheckoutError::NetworkError(_) => 503,
            CheckoutError::WebhookVerificationFailed(_) => 401,
            CheckoutError::WebhookParseError(_) => 400,
            CheckoutError::Serialization(_) => 500,
            CheckoutError::Internal(_) => 500,
        }
    }

    /// Returns true if the processor's own diagnostics are attached and must
    /// stay server-side. These render a generic message to the customer.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            CheckoutError::CheckoutCreationFailed { .. }
                | CheckoutError::PaymentVerificationFailed { .. }
                | CheckoutError::InvoiceIssuanceFailed { .. }
                | CheckoutError::NetworkError(_)
                | CheckoutError::Serialization(_)
                | CheckoutError::Internal(_)
        )
    }

    /// User-displayable message. Validation and not-found errors render
    /// inline; external-dependency failures never leak processor internals.
    pub fn user_message(&self) -> String {
        if self.is_external() {
            "Payment system unavailable, please retry".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Result type alias for checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CheckoutError::EmptyCart.status_code(), 400);
        assert_eq!(
            CheckoutError::CartLineNotFound {
                product_ref: "x".into()
            }
            .status_code(),
            404
        );
        assert_eq!(
            CheckoutError::PaymentIncomplete {
                session_id: "cs_1".into(),
                status: "open".into()
            }
            .status_code(),
            402
        );
        assert_eq!(
            CheckoutError::CheckoutCreationFailed {
                detail: "boom".into()
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn test_external_errors_are_sanitized() {
        let err = CheckoutError::CheckoutCreationFailed {
            detail: "HTTP 500: internal processor trace".into(),
        };
        assert!(err.is_external());
        assert!(!err.user_message().contains("processor trace"));

        let err = CheckoutError::BelowMinimumOrder {
            total: 499,
            minimum: 500,
        };
        assert!(!err.is_external());
        assert!(err.user_message().contains("4.99"));
        assert!(err.user_message().contains("5.00"));
    }
}
