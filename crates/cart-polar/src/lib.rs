//! # cart-polar
//!
//! Polar payment processor backend for ceramcart.
//!
//! This crate implements the `PaymentProcessor` seam against the Polar REST
//! API: ephemeral products, hosted checkout sessions, customer lookup, and
//! the invoice draft/finalize/send lifecycle. It also verifies and parses
//! Polar webhook deliveries.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cart_polar::PolarProcessor;
//!
//! // Create processor from environment
//! let processor = PolarProcessor::from_env()?;
//!
//! // Hand it to the pipeline as Arc<dyn PaymentProcessor>
//! let pipeline = CheckoutPipeline::new(
//!     cart, catalog, orders, Arc::new(processor), notifier, policy, urls,
//! );
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! use cart_polar::webhook::verify_webhook;
//!
//! // In your webhook endpoint:
//! let event = verify_webhook(&secret, &body, &signature_header)?;
//! if event.is_paid_checkout() {
//!     if let Some(session_id) = event.session_id() {
//!         pipeline.confirm(session_id).await?;
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod webhook;

// Re-exports
pub use client::PolarProcessor;
pub use config::PolarConfig;
pub use webhook::{verify_webhook, PolarEventKind, PolarWebhookEvent};
