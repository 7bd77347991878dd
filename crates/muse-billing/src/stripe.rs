//! Stripe REST implementation of [`PaymentGateway`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::{
    BillingConfig, BillingError, ChargeRequest, CheckoutRequest, CheckoutSession, PaymentGateway,
    PaymentIntent, PaymentMetadata, to_minor_units,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

pub struct StripeGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    currency: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(config: &BillingConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            currency: config.currency.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn api_key(&self) -> Result<&str, BillingError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BillingError::Config("STRIPE_SECRET_KEY not set".into()))
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(String, String)]) -> Result<T, BillingError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(self.api_key()?)
            .form(form)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BillingError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(self.api_key()?)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        decode(response).await
    }
}

/// Decode a success body, or surface the gateway's own error message.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BillingError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BillingError::Provider(e.to_string()))?;

    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", status));
        return Err(BillingError::Provider(message));
    }

    serde_json::from_str(&body).map_err(|e| BillingError::Provider(format!("unexpected response: {}", e)))
}

fn metadata_fields(metadata: &PaymentMetadata, prefix: &str) -> Vec<(String, String)> {
    metadata
        .to_map()
        .into_iter()
        .map(|(k, v)| (format!("{prefix}[{k}]"), v))
        .collect()
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(&self, charge: &ChargeRequest) -> Result<PaymentIntent, BillingError> {
        let mut form = vec![
            ("amount".to_string(), to_minor_units(charge.amount).to_string()),
            ("currency".to_string(), self.currency.clone()),
            ("description".to_string(), charge.description.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        if let Some(email) = &charge.receipt_email {
            form.push(("receipt_email".to_string(), email.clone()));
        }
        form.extend(metadata_fields(&charge.metadata, "metadata"));

        let intent: PaymentIntent = self.post_form("/payment_intents", &form).await?;
        info!(intent = %intent.id, amount = charge.amount, kind = %charge.metadata.kind, "Payment intent created");
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, BillingError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(BillingError::Provider(format!("invalid payment intent id '{}'", id)));
        }
        let intent: PaymentIntent = self.get(&format!("/payment_intents/{}", id)).await?;
        debug!(intent = %intent.id, status = %intent.status, "Payment intent retrieved");
        Ok(intent)
    }

    async fn create_checkout_session(&self, checkout: &CheckoutRequest) -> Result<CheckoutSession, BillingError> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), self.currency.clone()),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                to_minor_units(checkout.amount).to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                checkout.product_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                checkout.product_description.clone(),
            ),
            ("customer_email".to_string(), checkout.customer_email.clone()),
            ("success_url".to_string(), checkout.success_url.clone()),
            ("cancel_url".to_string(), checkout.cancel_url.clone()),
        ];
        form.extend(metadata_fields(&checkout.metadata, "metadata"));
        // Copy the metadata onto the intent too, so payment_intent events carry it.
        form.extend(metadata_fields(&checkout.metadata, "payment_intent_data[metadata]"));

        let session: CheckoutSession = self.post_form("/checkout/sessions", &form).await?;
        info!(session = %session.id, amount = checkout.amount, kind = %checkout.metadata.kind, "Checkout session created");
        Ok(session)
    }
}
