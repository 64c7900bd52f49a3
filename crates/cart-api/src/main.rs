//! # Ceramcart
//!
//! Checkout pipeline for the Ceramika ceramics storefront.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export POLAR_ACCESS_TOKEN=polar_oat_...
//! export POLAR_WEBHOOK_SECRET=...
//!
//! # Run the server
//! ceramcart
//! ```

use cart_api::{routes, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Initialize application state
    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Products loaded: {}", state.catalog.products.len());
    info!(
        "Minimum order: {} cents, shipping: {} cents/item, settlement rate: {}",
        state.config.minimum_order_cents,
        state.config.shipping_per_item_cents,
        state.config.settlement_rate
    );

    // Create router
    let app = routes::create_router(state);

    // Start server
    info!("Ceramcart starting on http://{}", addr);

    if !is_prod {
        info!("Cart: GET http://{}/api/v1/cart", addr);
        info!("Checkout: POST http://{}/api/v1/checkout", addr);
        info!("Webhook: POST http://{}/webhook/polar", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
