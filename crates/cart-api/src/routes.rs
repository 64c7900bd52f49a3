//! # Routes
//!
//! Axum router configuration for the storefront checkout API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Catalog:
///   - GET  /api/v1/products - List active products
///   - GET  /api/v1/products/{product_ref} - Get product
///
/// - Cart (identified by X-Customer-Id):
///   - GET    /api/v1/cart - Read cart with live totals
///   - POST   /api/v1/cart/items - Add a product (quantities merge)
///   - PUT    /api/v1/cart/items/{product_ref} - Set quantity (0 removes)
///   - DELETE /api/v1/cart/items/{product_ref} - Remove a line
///   - DELETE /api/v1/cart - Empty the cart
///
/// - Checkout:
///   - POST /api/v1/checkout - Snapshot the cart, create a hosted session
///   - GET  /checkout/success - Confirm payment, materialize the order
///   - GET  /checkout/cancel - Ephemeral product cleanup
///
/// - Orders & invoices:
///   - GET    /api/v1/orders - List the customer's orders
///   - GET    /api/v1/orders/{order_id} - Fetch one order
///   - POST   /api/v1/orders/{order_id}/invoice - Issue (idempotent)
///   - GET    /api/v1/orders/{order_id}/invoice - Fetch issued invoice
///   - DELETE /api/v1/orders/{order_id}/invoice - Void and unlink
///
/// - Webhooks:
///   - POST /webhook/polar - Polar webhook handler
pub fn create_router(state: AppState) -> Router {
    // CORS: the storefront frontend lives on another origin in development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Success/cancel landings
    let checkout_routes = Router::new()
        .route("/success", get(handlers::checkout_success))
        .route("/cancel", get(handlers::checkout_cancel));

    let api_routes = Router::new()
        // Catalog
        .route("/products", get(handlers::list_products))
        .route("/products/{product_ref}", get(handlers::get_product))
        // Cart
        .route("/cart", get(handlers::get_cart).delete(handlers::clear_cart))
        .route("/cart/items", post(handlers::add_cart_item))
        .route(
            "/cart/items/{product_ref}",
            put(handlers::set_cart_quantity).delete(handlers::remove_cart_item),
        )
        // Checkout
        .route("/checkout", post(handlers::create_checkout))
        // Orders
        .route("/orders", get(handlers::list_orders))
        .route("/orders/{order_id}", get(handlers::get_order))
        .route(
            "/orders/{order_id}/invoice",
            post(handlers::issue_invoice)
                .get(handlers::get_invoice)
                .delete(handlers::void_invoice),
        );

    // Webhook routes (no CORS, must accept raw body)
    let webhook_routes = Router::new().route("/polar", post(handlers::polar_webhook));

    Router::new()
        // Health check at root
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        // Checkout success/cancel landings
        .nest("/checkout", checkout_routes)
        // API v1
        .nest("/api/v1", api_routes)
        // Webhooks
        .nest("/webhook", webhook_routes)
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // State
        .with_state(state)
}
