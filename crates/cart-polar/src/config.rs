//! # Polar Configuration
//!
//! Configuration management for the Polar integration.
//! All secrets are loaded from environment variables.

use cart_core::CheckoutError;
use std::env;

/// Polar API configuration
#[derive(Debug, Clone)]
pub struct PolarConfig {
    /// Organization access token (polar_oat_... or polar_at_...)
    pub access_token: String,

    /// Webhook signing secret
    pub webhook_secret: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,
}

impl PolarConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `POLAR_ACCESS_TOKEN`
    /// - `POLAR_WEBHOOK_SECRET`
    ///
    /// Optional:
    /// - `POLAR_API_BASE_URL` (defaults to the production API)
    pub fn from_env() -> Result<Self, CheckoutError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let access_token = env::var("POLAR_ACCESS_TOKEN").map_err(|_| {
            CheckoutError::Configuration("POLAR_ACCESS_TOKEN not set".to_string())
        })?;

        let webhook_secret = env::var("POLAR_WEBHOOK_SECRET").map_err(|_| {
            CheckoutError::Configuration("POLAR_WEBHOOK_SECRET not set".to_string())
        })?;

        if !access_token.starts_with("polar_") {
            return Err(CheckoutError::Configuration(
                "POLAR_ACCESS_TOKEN must start with polar_".to_string(),
            ));
        }

        if webhook_secret.is_empty() {
            return Err(CheckoutError::Configuration(
                "POLAR_WEBHOOK_SECRET must not be empty".to_string(),
            ));
        }

        let api_base_url = env::var("POLAR_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.polar.sh".to_string());

        Ok(Self {
            access_token,
            webhook_secret,
            api_base_url,
        })
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        access_token: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            webhook_secret: webhook_secret.into(),
            api_base_url: "https://api.polar.sh".to_string(),
        }
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header() {
        let config = PolarConfig::new("polar_oat_abc123", "wh_secret");
        assert_eq!(config.auth_header(), "Bearer polar_oat_abc123");
    }

    #[test]
    fn test_base_url_override() {
        let config =
            PolarConfig::new("polar_oat_abc123", "wh_secret").with_api_base_url("http://localhost");
        assert_eq!(config.api_base_url, "http://localhost");
    }
}
