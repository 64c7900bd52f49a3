//! # Application State
//!
//! Shared state for the Axum application.
//! Wires the checkout pipeline from its collaborators and loads the catalog.

use cart_core::{
    CheckoutPipeline, CheckoutUrls, LoggingNotifier, MemoryCartStore, MemoryOrderStore,
    PricingPolicy, StaticCatalog,
};
use cart_polar::PolarProcessor;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for redirect targets
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Minimum order total in quote-currency cents
    pub minimum_order_cents: i64,
    /// Per-item shipping surcharge in quote-currency cents
    pub shipping_per_item_cents: i64,
    /// Quote-to-settlement conversion rate
    pub settlement_rate: f64,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            minimum_order_cents: std::env::var("MINIMUM_ORDER_CENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20000),
            shipping_per_item_cents: std::env::var("SHIPPING_PER_ITEM_CENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(40),
            settlement_rate: std::env::var("SETTLEMENT_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.08),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address: {}", e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Pricing rules derived from the configuration
    pub fn pricing_policy(&self) -> PricingPolicy {
        PricingPolicy {
            minimum_order_minor: self.minimum_order_cents,
            per_item_shipping_minor: self.shipping_per_item_cents,
            settlement_rate: self.settlement_rate,
            ..PricingPolicy::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The checkout pipeline
    pub pipeline: CheckoutPipeline,
    /// Product catalog (read side, for listing endpoints)
    pub catalog: Arc<StaticCatalog>,
    /// Webhook signing secret
    pub webhook_secret: String,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Create a new AppState backed by the Polar processor
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let catalog = Arc::new(load_product_catalog()?);

        let processor = PolarProcessor::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Polar: {}", e))?;
        let webhook_secret = processor.config().webhook_secret.clone();

        let pipeline = CheckoutPipeline::new(
            Arc::new(MemoryCartStore::new()),
            catalog.clone(),
            Arc::new(MemoryOrderStore::new()),
            Arc::new(processor),
            Arc::new(LoggingNotifier),
            config.pricing_policy(),
            CheckoutUrls::new(&config.base_url),
        );

        Ok(Self {
            pipeline,
            catalog,
            webhook_secret,
            config,
        })
    }
}

/// Load product catalog from config file
fn load_product_catalog() -> anyhow::Result<StaticCatalog> {
    // Try to load from config/products.toml
    let config_paths = [
        "config/products.toml",
        "../config/products.toml",
        "../../config/products.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let catalog = StaticCatalog::from_toml(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            tracing::info!("Loaded {} products from {}", catalog.products.len(), path);
            return Ok(catalog);
        }
    }

    // Return empty catalog if no config found
    tracing::warn!("No product catalog found, using empty catalog");
    Ok(StaticCatalog::new())
}
