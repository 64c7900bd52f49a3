//! # cart-core
//!
//! Core types and orchestration for the ceramcart checkout engine.
//!
//! This crate provides:
//! - `CartStore` and `ProductCatalog` traits with in-process implementations
//! - `PricingPolicy` for shipping, minimum-order, and settlement conversion
//! - `CartSnapshot` and `CheckoutSession` for the session-builder flow
//! - `PaymentProcessor` trait for implementing payment providers
//! - `Order` and `OrderStore` for exactly-once order materialization
//! - `CheckoutPipeline` tying the collaborators together
//! - `CheckoutError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use cart_core::{CheckoutPipeline, CheckoutUrls, PricingPolicy};
//!
//! // Wire the pipeline from its collaborators
//! let pipeline = CheckoutPipeline::new(
//!     cart, catalog, orders, processor, notifier,
//!     PricingPolicy::default(),
//!     CheckoutUrls::new("https://ceramika.shop"),
//! );
//!
//! // Fill a cart and open a hosted checkout session
//! pipeline.add_to_cart("alice", "vase-bleu", 2).await?;
//! let session = pipeline.begin_checkout("alice", Some("alice@example.com")).await?;
//!
//! // Redirect the customer to session.checkout_url; later, both the
//! // success redirect and the webhook land on the same confirmation
//! let order = pipeline.confirm(&session.session_id).await?;
//! ```

pub mod cart;
pub mod error;
pub mod money;
pub mod notify;
pub mod order;
pub mod pipeline;
pub mod pricing;
pub mod processor;
pub mod session;

// Re-exports for convenience
pub use cart::{
    CartLine, CartStore, CartView, CatalogEntry, MemoryCartStore, PriceQuote,
    ProductCatalog, ProductInfo, QuotedLine, StaticCatalog,
};
pub use error::{CheckoutError, CheckoutResult};
pub use money::{Amount, Currency};
pub use notify::{LoggingNotifier, Notifier, OrderNotification};
pub use order::{
    IssuanceClaim, MemoryOrderStore, Order, OrderLineItem, OrderStatus, OrderStore,
    SessionInsert,
};
pub use pipeline::{CheckoutPipeline, CheckoutUrls};
pub use pricing::{round_half_even, PricingPolicy};
pub use processor::{
    BoxedProcessor, CreatedSession, EphemeralProductSpec, InvoiceDoc, InvoiceLine,
    PaymentProcessor, PaymentStatus, SessionState,
};
pub use session::{CartSnapshot, CheckoutSession, SnapshotLine};
