//! muse-billing - payment gateway integration for donations
//!
//! This crate provides:
//! - The [`PaymentGateway`] trait used by the API to charge donors
//! - A Stripe implementation talking to the REST API over `reqwest`
//! - Webhook signature verification and event parsing
//!
//! Amounts cross this boundary in whole currency units and are converted to
//! the gateway's minor unit with [`to_minor_units`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub mod stripe;
mod webhook;

pub use stripe::StripeGateway;
pub use webhook::{
    PaymentObject, SIGNATURE_TOLERANCE_SECS, WebhookEvent, parse_webhook_event, sign_payload,
    verify_signature,
};

/// Billing errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("{0}")]
    InvalidSignature(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Gateway configuration, read from the environment.
#[derive(Clone, Default)]
pub struct BillingConfig {
    /// Secret API key. Without it every gateway call fails.
    pub api_key: Option<String>,

    /// Endpoint secret used to verify webhook signatures. Without it every
    /// webhook is rejected.
    pub webhook_secret: Option<String>,

    /// ISO currency code for all charges.
    pub currency: String,

    /// Base URL of the gateway API.
    pub api_base: String,
}

impl BillingConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: non_empty_var("STRIPE_SECRET_KEY"),
            webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET"),
            currency: non_empty_var("STRIPE_CURRENCY").unwrap_or_else(|| "usd".into()),
            api_base: non_empty_var("STRIPE_API_BASE").unwrap_or_else(|| stripe::DEFAULT_API_BASE.into()),
        }
    }

    /// Configuration for tests; never reaches a real gateway.
    pub fn test() -> Self {
        Self {
            api_key: Some("sk_test_muse".into()),
            webhook_secret: Some("whsec_test_muse".into()),
            currency: "usd".into(),
            api_base: "http://127.0.0.1:9".into(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Convert whole currency units to the gateway's minor unit (cents).
pub fn to_minor_units(amount: u32) -> u64 {
    u64::from(amount) * 100
}

/// Identifiers attached to every charge so that a webhook can be matched to
/// its donation without any client-supplied state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub donation_id: Option<String>,
    pub donor_email: String,
    pub donor_type: String,
    pub kind: String,
    pub target_id: Option<String>,
}

impl PaymentMetadata {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(id) = &self.donation_id {
            map.insert("donation_id".to_string(), id.clone());
        }
        map.insert("donor_email".to_string(), self.donor_email.clone());
        map.insert("donor_type".to_string(), self.donor_type.clone());
        map.insert("kind".to_string(), self.kind.clone());
        if let Some(target) = &self.target_id {
            map.insert("target_id".to_string(), target.clone());
        }
        map
    }

    /// Rebuild metadata from a gateway object. `None` unless the donor email
    /// and the donation kind are both present.
    pub fn from_map(map: &BTreeMap<String, String>) -> Option<Self> {
        let get = |key: &str| map.get(key).filter(|v| !v.is_empty()).cloned();
        Some(Self {
            donation_id: get("donation_id"),
            donor_email: get("donor_email")?,
            donor_type: get("donor_type").unwrap_or_default(),
            kind: get("kind")?,
            target_id: get("target_id"),
        })
    }
}

/// A one-off charge the client confirms with the returned secret.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Whole currency units.
    pub amount: u32,
    pub description: String,
    pub receipt_email: Option<String>,
    pub metadata: PaymentMetadata,
}

/// A hosted checkout page for a single line item.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Whole currency units.
    pub amount: u32,
    pub product_name: String,
    pub product_description: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Payment gateway trait for dependency injection
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(&self, charge: &ChargeRequest) -> Result<PaymentIntent, BillingError>;

    /// Fetch the authoritative state of an intent.
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, BillingError>;

    async fn create_checkout_session(&self, checkout: &CheckoutRequest) -> Result<CheckoutSession, BillingError>;
}
