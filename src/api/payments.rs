use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Extension;

use super::extract::Json;
use super::{ApiResult, AppState};
use crate::services::payment::{CreateIntent, IntentResponse, WebhookOutcome};
use crate::services::AuthUser;
use crate::EcommerceError;

pub async fn create_intent(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateIntent>,
) -> ApiResult<Json<IntentResponse>> {
    Ok(Json(s.services.payments.create_intent(&user, req).await?))
}

/// Stripe webhook. Must receive the raw body for signature verification.
pub async fn webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers.get("stripe-signature").and_then(|v| v.to_str().ok()).ok_or_else(|| {
        tracing::warn!("Missing Stripe-Signature header");
        EcommerceError::Validation("Missing Stripe-Signature header".into())
    })?;
    let outcome: WebhookOutcome = s.services.payments.handle_webhook(&body, signature).await?;
    Ok(Json(serde_json::json!({ "received": true, "outcome": outcome })))
}
