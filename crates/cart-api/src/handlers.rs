//! # Request Handlers
//!
//! Axum request handlers for the storefront checkout API.
//!
//! Cart and order routes identify the customer through the `X-Customer-Id`
//! header; the storefront session layer owns how that id is minted. Error
//! bodies carry `CheckoutError::user_message()`, so processor diagnostics
//! stay in the server logs.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use cart_core::{Amount, CheckoutError, InvoiceDoc, Order, QuotedLine};
use cart_polar::webhook::verify_webhook;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Add-to-cart request
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_ref: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Set-quantity request
#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: u32,
}

/// Cart view with live prices and derived totals. Carted refs the catalog
/// no longer sells are listed in `unavailable` and excluded from the
/// totals; the storefront prompts the customer to drop them.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<QuotedLine>,
    pub subtotal: Amount,
    pub shipping: Amount,
    pub total: Amount,
    pub item_count: u32,
    pub unavailable: Vec<String>,
}

/// Begin-checkout request
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// Begin-checkout response
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Session ID
    pub session_id: String,
    /// Checkout URL (redirect the customer here)
    pub checkout_url: String,
}

/// Invoice issuance request
#[derive(Debug, Default, Deserialize)]
pub struct InvoiceRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_to_response(err: CheckoutError) -> HandlerError {
    let code = err.status_code();
    if err.is_external() {
        // Full diagnostics stay server-side; the body gets the generic message
        error!("External dependency failure: {}", err);
    }
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(err.user_message(), code)),
    )
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(message, 400)),
    )
}

/// Customer identity from the `X-Customer-Id` header
fn owner_id(headers: &HeaderMap) -> Result<String, HandlerError> {
    headers
        .get("x-customer-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| bad_request("Missing X-Customer-Id header"))
}

async fn cart_response(state: &AppState, owner: &str) -> Result<Json<CartResponse>, HandlerError> {
    let view = state
        .pipeline
        .quote(owner)
        .await
        .map_err(error_to_response)?;
    Ok(Json(CartResponse {
        items: view.lines,
        subtotal: view.quote.subtotal,
        shipping: view.quote.shipping_fee,
        total: view.quote.total,
        item_count: view.quote.item_count,
        unavailable: view.unavailable,
    }))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ceramcart",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// List active catalog products
pub async fn list_products(State(state): State<AppState>) -> impl IntoResponse {
    let products: Vec<_> = state.catalog.products.iter().filter(|p| p.active).collect();
    Json(serde_json::json!({
        "products": products,
        "count": products.len()
    }))
}

/// Get a single product
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_ref): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let product = state
        .catalog
        .products
        .iter()
        .find(|p| p.product_ref == product_ref)
        .ok_or_else(|| {
            error_to_response(CheckoutError::ProductNotFound {
                product_ref: product_ref.clone(),
            })
        })?;
    Ok(Json(product.clone()))
}

/// Read the cart with live prices and totals
pub async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CartResponse>, HandlerError> {
    let owner = owner_id(&headers)?;
    cart_response(&state, &owner).await
}

/// Add a product to the cart (quantities merge)
#[instrument(skip(state, headers, request), fields(product_ref = %request.product_ref))]
pub async fn add_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, HandlerError> {
    let owner = owner_id(&headers)?;
    state
        .pipeline
        .add_to_cart(&owner, &request.product_ref, request.quantity)
        .await
        .map_err(error_to_response)?;
    cart_response(&state, &owner).await
}

/// Overwrite a line's quantity; zero removes the line
pub async fn set_cart_quantity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_ref): Path<String>,
    Json(request): Json<SetQuantityRequest>,
) -> Result<Json<CartResponse>, HandlerError> {
    let owner = owner_id(&headers)?;
    state
        .pipeline
        .set_quantity(&owner, &product_ref, request.quantity)
        .await
        .map_err(error_to_response)?;
    cart_response(&state, &owner).await
}

/// Remove a line; idempotent
pub async fn remove_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_ref): Path<String>,
) -> Result<Json<CartResponse>, HandlerError> {
    let owner = owner_id(&headers)?;
    state
        .pipeline
        .remove_line(&owner, &product_ref)
        .await
        .map_err(error_to_response)?;
    cart_response(&state, &owner).await
}

/// Empty the cart
pub async fn clear_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, HandlerError> {
    let owner = owner_id(&headers)?;
    state
        .pipeline
        .clear_cart(&owner)
        .await
        .map_err(error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Snapshot the cart and create a hosted checkout session
#[instrument(skip(state, headers, request))]
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Option<Json<CheckoutRequest>>,
) -> Result<Json<CheckoutResponse>, HandlerError> {
    let owner = owner_id(&headers)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let session = state
        .pipeline
        .begin_checkout(&owner, request.customer_email.as_deref())
        .await
        .map_err(error_to_response)?;

    info!(
        "Checkout session {} created for {}",
        session.session_id, owner
    );

    Ok(Json(CheckoutResponse {
        session_id: session.session_id,
        checkout_url: session.checkout_url,
    }))
}

/// Checkout success landing. The session id from the query string is only a
/// lookup key; payment state is re-fetched from the processor before the
/// order is materialized. Refreshing this page replays harmlessly.
#[instrument(skip(state, params))]
pub async fn checkout_success(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(session_id) = params.get("session_id") else {
        return (
            StatusCode::BAD_REQUEST,
            Html("<h1>Missing session_id</h1>".to_string()),
        );
    };

    match state.pipeline.confirm(session_id).await {
        Ok(order) => (
            StatusCode::OK,
            Html(format!(
                r#"
<!DOCTYPE html>
<html>
<head><title>Order Confirmed</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f5f0eb;">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Merci !</h1>
        <p>Order <code>{}</code> confirmed.</p>
        <p>Total: {}</p>
    </div>
</body>
</html>
"#,
                order.id,
                order.total.display()
            )),
        ),
        Err(err) => {
            let code = err.status_code();
            (
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Html(format!(
                    r#"
<!DOCTYPE html>
<html>
<head><title>Payment Pending</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f5f0eb;">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Something went wrong</h1>
        <p>{}</p>
    </div>
</body>
</html>
"#,
                    err.user_message()
                )),
            )
        }
    }
}

/// Checkout cancel landing. Cleans up the ephemeral product if its ref was
/// carried through the cancel URL; the cart is left untouched.
pub async fn checkout_cancel(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if let Some(product_ref) = params.get("product_ref") {
        state.pipeline.cancel_cleanup(product_ref).await;
    }
    Html(
        r#"
<!DOCTYPE html>
<html>
<head><title>Checkout Cancelled</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f5f0eb;">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Checkout cancelled</h1>
        <p>No charges were made. Your cart is unchanged.</p>
    </div>
</body>
</html>
"#,
    )
}

/// Handle Polar webhook deliveries. Paid-checkout events converge on the same
/// confirmation path as the success redirect; everything else is acknowledged
/// and ignored.
#[instrument(skip(state, headers, body))]
pub async fn polar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HandlerError> {
    let signature = headers
        .get("polar-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| bad_request("Missing Polar-Signature header"))?;

    let event = verify_webhook(&state.webhook_secret, &body, signature).map_err(|e| {
        error!("Webhook verification failed: {}", e);
        error_to_response(e)
    })?;

    info!("Received webhook: kind={:?}", event.kind);

    if event.is_paid_checkout() {
        match event.session_id() {
            Some(session_id) => {
                let order = state
                    .pipeline
                    .confirm(session_id)
                    .await
                    .map_err(error_to_response)?;
                info!("Webhook confirmed order {} for session {}", order.id, session_id);
            }
            None => warn!("Paid-checkout event without a session id"),
        }
    }

    Ok(StatusCode::OK)
}

/// List the customer's orders, newest first
pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Order>>, HandlerError> {
    let owner = owner_id(&headers)?;
    let orders = state
        .pipeline
        .orders_for(&owner)
        .await
        .map_err(error_to_response)?;
    Ok(Json(orders))
}

/// Fetch one of the customer's orders
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, HandlerError> {
    let owner = owner_id(&headers)?;
    let order = owned_order(&state, &owner, &order_id).await?;
    Ok(Json(order))
}

/// Issue (or return the already-issued) invoice for a paid order
#[instrument(skip(state, headers, request))]
pub async fn issue_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
    request: Option<Json<InvoiceRequest>>,
) -> Result<Json<InvoiceDoc>, HandlerError> {
    let owner = owner_id(&headers)?;
    owned_order(&state, &owner, &order_id).await?;

    let request = request.map(|Json(r)| r).unwrap_or_default();
    let doc = state
        .pipeline
        .issue_invoice(&order_id, request.email.as_deref(), request.name.as_deref())
        .await
        .map_err(error_to_response)?;
    Ok(Json(doc))
}

/// Fetch the invoice already issued for an order
pub async fn get_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<InvoiceDoc>, HandlerError> {
    let owner = owner_id(&headers)?;
    owned_order(&state, &owner, &order_id).await?;

    let doc = state
        .pipeline
        .fetch_invoice_for(&order_id)
        .await
        .map_err(error_to_response)?;
    Ok(Json(doc))
}

/// Void an issued invoice, allowing re-generation
pub async fn void_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let owner = owner_id(&headers)?;
    owned_order(&state, &owner, &order_id).await?;

    state
        .pipeline
        .void_invoice_for(&order_id)
        .await
        .map_err(error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Fetch an order and hide other customers' orders behind a plain not-found
async fn owned_order(
    state: &AppState,
    owner: &str,
    order_id: &str,
) -> Result<Order, HandlerError> {
    let order = state
        .pipeline
        .order(order_id)
        .await
        .map_err(error_to_response)?;
    if order.owner_id != owner {
        return Err(error_to_response(CheckoutError::OrderNotFound {
            order_id: order_id.to_string(),
        }));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::state::AppConfig;
    use async_trait::async_trait;
    use axum_test::TestServer;
    use cart_core::{
        CheckoutPipeline, CheckoutResult, CheckoutUrls, CreatedSession, Currency,
        EphemeralProductSpec, InvoiceLine, LoggingNotifier, MemoryCartStore, MemoryOrderStore,
        PaymentProcessor, PaymentStatus, SessionState, StaticCatalog,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Always-paying processor double for handler tests
    #[derive(Default)]
    struct FakeProcessor {
        counter: AtomicUsize,
        sessions: Mutex<HashMap<String, HashMap<String, String>>>,
    }

    #[async_trait]
    impl PaymentProcessor for FakeProcessor {
        async fn create_ephemeral_product(
            &self,
            _spec: &EphemeralProductSpec,
        ) -> CheckoutResult<String> {
            Ok(format!("prod_{}", self.counter.fetch_add(1, Ordering::SeqCst)))
        }

        async fn delete_product(&self, _product_ref: &str) -> CheckoutResult<()> {
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
            let session_id = format!("cs_{}", self.counter.fetch_add(1, Ordering::SeqCst));
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
            Ok(SessionState {
                session_id: session_id.to_string(),
                status: PaymentStatus::Paid,
                amount_minor: None,
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
            Ok("cus_1".to_string())
        }

        async fn create_invoice(
            &self,
            _customer_ref: &str,
            _lines: &[InvoiceLine],
            _metadata: &HashMap<String, String>,
        ) -> CheckoutResult<String> {
            Ok("in_1".to_string())
        }

        async fn finalize_invoice(&self, _invoice_ref: &str) -> CheckoutResult<()> {
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
            "fake"
        }
    }

    fn test_state() -> AppState {
        let catalog = Arc::new(
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
            .unwrap(),
        );

        let config = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            base_url: "http://localhost:8080".to_string(),
            environment: "test".to_string(),
            minimum_order_cents: 500,
            shipping_per_item_cents: 40,
            settlement_rate: 1.08,
        };

        let pipeline = CheckoutPipeline::new(
            Arc::new(MemoryCartStore::new()),
            catalog.clone(),
            Arc::new(MemoryOrderStore::new()),
            Arc::new(FakeProcessor::default()),
            Arc::new(LoggingNotifier),
            config.pricing_policy(),
            CheckoutUrls::new(&config.base_url),
        );

        AppState {
            pipeline,
            catalog,
            webhook_secret: "wh_secret".to_string(),
            config,
        }
    }

    fn server() -> TestServer {
        TestServer::new(routes::create_router(test_state())).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = server();
        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["service"], "ceramcart");
    }

    #[tokio::test]
    async fn test_cart_requires_customer_header() {
        let server = server();
        let response = server.get("/api/v1/cart").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cart_add_and_totals() {
        let server = server();
        let response = server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "vase-bleu", "quantity": 2 }))
            .await;
        response.assert_status_ok();

        let cart = response.json::<serde_json::Value>();
        assert_eq!(cart["subtotal"]["minor"], 2000);
        assert_eq!(cart["shipping"]["minor"], 80);
        assert_eq!(cart["total"]["minor"], 2080);
        assert_eq!(cart["item_count"], 2);
        assert_eq!(cart["unavailable"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_add_unknown_product() {
        let server = server();
        let response = server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "ghost" }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_checkout_below_minimum() {
        let server = server();
        server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "petit-bol" }))
            .await
            .assert_status_ok();

        // 4.59 + 0.40 shipping = 4.99 against a 5.00 minimum
        let response = server
            .post("/api/v1/checkout")
            .add_header("x-customer-id", "alice")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json::<serde_json::Value>();
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("4.99"));
        assert!(message.contains("5.00"));
    }

    #[tokio::test]
    async fn test_checkout_and_success_confirmation() {
        let server = server();
        server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "vase-bleu", "quantity": 2 }))
            .await
            .assert_status_ok();

        let checkout = server
            .post("/api/v1/checkout")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "customer_email": "alice@example.com" }))
            .await;
        checkout.assert_status_ok();
        let session_id = checkout.json::<serde_json::Value>()["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        // The success redirect confirms and materializes the order
        let success = server
            .get("/checkout/success")
            .add_query_param("session_id", &session_id)
            .await;
        success.assert_status_ok();

        // Replaying the redirect is harmless
        server
            .get("/checkout/success")
            .add_query_param("session_id", &session_id)
            .await
            .assert_status_ok();

        let orders = server
            .get("/api/v1/orders")
            .add_header("x-customer-id", "alice")
            .await;
        orders.assert_status_ok();
        let orders = orders.json::<Vec<Order>>();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total.minor, 2080);

        // Cart was emptied on materialization
        let cart = server
            .get("/api/v1/cart")
            .add_header("x-customer-id", "alice")
            .await
            .json::<serde_json::Value>();
        assert_eq!(cart["item_count"], 0);
    }

    #[tokio::test]
    async fn test_orders_are_scoped_to_owner() {
        let server = server();
        server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "vase-bleu" }))
            .await
            .assert_status_ok();
        let session_id = server
            .post("/api/v1/checkout")
            .add_header("x-customer-id", "alice")
            .await
            .json::<serde_json::Value>()["session_id"]
            .as_str()
            .unwrap()
            .to_string();
        server
            .get("/checkout/success")
            .add_query_param("session_id", &session_id)
            .await
            .assert_status_ok();

        let order_id = server
            .get("/api/v1/orders")
            .add_header("x-customer-id", "alice")
            .await
            .json::<Vec<Order>>()[0]
            .id
            .clone();

        // Another customer sees a plain not-found
        let response = server
            .get(&format!("/api/v1/orders/{}", order_id))
            .add_header("x-customer-id", "mallory")
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invoice_issue_and_fetch() {
        let server = server();
        server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "vase-bleu" }))
            .await
            .assert_status_ok();
        let session_id = server
            .post("/api/v1/checkout")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "customer_email": "alice@example.com" }))
            .await
            .json::<serde_json::Value>()["session_id"]
            .as_str()
            .unwrap()
            .to_string();
        server
            .get("/checkout/success")
            .add_query_param("session_id", &session_id)
            .await
            .assert_status_ok();

        let order_id = server
            .get("/api/v1/orders")
            .add_header("x-customer-id", "alice")
            .await
            .json::<Vec<Order>>()[0]
            .id
            .clone();

        let issued = server
            .post(&format!("/api/v1/orders/{}/invoice", order_id))
            .add_header("x-customer-id", "alice")
            .await;
        issued.assert_status_ok();
        assert_eq!(issued.json::<serde_json::Value>()["id"], "in_1");

        let fetched = server
            .get(&format!("/api/v1/orders/{}/invoice", order_id))
            .add_header("x-customer-id", "alice")
            .await;
        fetched.assert_status_ok();
        assert_eq!(fetched.json::<serde_json::Value>()["status"], "open");
    }

    /// Mirrors Polar's signing scheme: `t=<ts>,v1=<hex>` over
    /// `"{ts}.{payload}"` with HMAC-SHA256 under the shared secret
    fn sign_webhook(secret: &str, payload: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    #[tokio::test]
    async fn test_webhook_confirms_paid_checkout() {
        let server = server();
        server
            .post("/api/v1/cart/items")
            .add_header("x-customer-id", "alice")
            .json(&serde_json::json!({ "product_ref": "vase-bleu", "quantity": 2 }))
            .await
            .assert_status_ok();
        let session_id = server
            .post("/api/v1/checkout")
            .add_header("x-customer-id", "alice")
            .await
            .json::<serde_json::Value>()["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        // A validly signed paid-checkout event materializes the order
        let payload = serde_json::json!({
            "type": "checkout.updated",
            "data": { "id": session_id, "status": "succeeded" },
        })
        .to_string();
        let response = server
            .post("/webhook/polar")
            .add_header("polar-signature", sign_webhook("wh_secret", &payload))
            .text(payload.clone())
            .await;
        response.assert_status_ok();

        let orders = server
            .get("/api/v1/orders")
            .add_header("x-customer-id", "alice")
            .await
            .json::<Vec<Order>>();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total.minor, 2080);

        // Polar retries deliveries; a duplicate must not create a second order
        server
            .post("/webhook/polar")
            .add_header("polar-signature", sign_webhook("wh_secret", &payload))
            .text(payload)
            .await
            .assert_status_ok();
        let orders = server
            .get("/api/v1/orders")
            .add_header("x-customer-id", "alice")
            .await
            .json::<Vec<Order>>();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let server = server();
        let response = server
            .post("/webhook/polar")
            .add_header("polar-signature", "t=1,v1=deadbeef")
            .text(r#"{"type":"checkout.updated","data":{}}"#)
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_requires_signature_header() {
        let server = server();
        let response = server
            .post("/webhook/polar")
            .text(r#"{"type":"checkout.updated","data":{}}"#)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
