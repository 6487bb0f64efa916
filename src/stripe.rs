//! Stripe integration via REST API (no SDK dependency)

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::StripeConfig;
use crate::{EcommerceError, Result};

const API_BASE: &str = "https://api.stripe.com/v1";
/// Webhooks older than this are rejected to prevent replays.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug)]
pub struct IntentRequest<'a> {
    pub amount_minor: i64,
    pub currency: &'a str,
    pub customer_id: &'a str,
    pub order_id: Uuid,
    pub order_number: &'a str,
}

/// Payment processor seam.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String>;
    async fn create_payment_intent(&self, request: IntentRequest<'_>) -> Result<PaymentIntent>;
    /// Returns the processor's refund id.
    async fn refund(&self, intent_id: &str, amount_minor: i64) -> Result<String>;
    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()>;
}

pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Self {
        Self { client: reqwest::Client::new(), secret_key: config.secret_key.clone(), webhook_secret: config.webhook_secret.clone() }
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{API_BASE}{path}"))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| EcommerceError::Payment(format!("Stripe request failed: {e}")))?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EcommerceError::Payment(format!("Stripe returned an unreadable body: {e}")))?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            tracing::error!(%status, path, message, "Stripe API error");
            return Err(EcommerceError::Payment(format!("Stripe error: {message}")));
        }
        Ok(body)
    }
}

fn string_field(resp: &serde_json::Value, field: &str, op: &str) -> Result<String> {
    resp[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| EcommerceError::Payment(format!("Stripe {op} response missing `{field}`")))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String> {
        let user_id = user_id.to_string();
        let resp = self.post("/customers", &[("email", email), ("metadata[user_id]", user_id.as_str())]).await?;
        string_field(&resp, "id", "create_customer")
    }

    async fn create_payment_intent(&self, request: IntentRequest<'_>) -> Result<PaymentIntent> {
        let amount = request.amount_minor.to_string();
        let currency = request.currency.to_lowercase();
        let order_id = request.order_id.to_string();
        let resp = self
            .post(
                "/payment_intents",
                &[
                    ("amount", amount.as_str()),
                    ("currency", currency.as_str()),
                    ("customer", request.customer_id),
                    ("automatic_payment_methods[enabled]", "true"),
                    ("metadata[order_id]", order_id.as_str()),
                    ("metadata[order_number]", request.order_number),
                ],
            )
            .await?;
        Ok(PaymentIntent { id: string_field(&resp, "id", "create_payment_intent")?, client_secret: string_field(&resp, "client_secret", "create_payment_intent")? })
    }

    async fn refund(&self, intent_id: &str, amount_minor: i64) -> Result<String> {
        let amount = amount_minor.to_string();
        let resp = self.post("/refunds", &[("payment_intent", intent_id), ("amount", amount.as_str())]).await?;
        string_field(&resp, "id", "refund")
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_webhook_signature(payload, signature_header, &self.webhook_secret, chrono::Utc::now().timestamp())
            .map_err(|e| EcommerceError::Validation(e.to_string()))
    }
}

/// Verify Stripe webhook signature (HMAC-SHA256 over `"{t}.{payload}"`).
pub fn verify_webhook_signature(payload: &[u8], sig_header: &str, secret: &str, now: i64) -> std::result::Result<(), &'static str> {
    let mut timestamp = "";
    let mut signatures = Vec::new();
    for part in sig_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    if timestamp.is_empty() || signatures.is_empty() {
        return Err("Invalid Stripe-Signature header");
    }

    let ts: i64 = timestamp.parse().map_err(|_| "Invalid timestamp")?;
    if now.abs_diff(ts) > WEBHOOK_TOLERANCE_SECS.unsigned_abs() {
        return Err("Webhook timestamp outside tolerance");
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Stripe may send several v1 signatures during secret rotation.
    let matched = signatures.iter().any(|sig| {
        hex::decode(sig).map(|bytes| mac.clone().verify_slice(&bytes).is_ok()).unwrap_or(false)
    });
    if matched { Ok(()) } else { Err("Webhook signature mismatch") }
}

#[cfg(test)]
pub(crate) fn sign_webhook(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
