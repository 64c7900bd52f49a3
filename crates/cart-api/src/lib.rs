//! # cart-api
//!
//! HTTP API layer for ceramcart: cart CRUD, checkout session creation,
//! payment confirmation (redirect and webhook), orders, and invoices.

pub mod handlers;
pub mod routes;
pub mod state;
