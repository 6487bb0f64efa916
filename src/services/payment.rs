//! Payment intents and processor webhooks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::aggregates::{EntityKind, Order, OrderError, User, WebhookEvent};
use crate::events::EventPublisher;
use crate::services::{AuditService, AuthUser, InventoryService};
use crate::store::Repository;
use crate::stripe::{IntentRequest, PaymentGateway, PaymentIntent};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateIntent {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentResponse {
    pub order_id: Uuid,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// The event id was handled before.
    Duplicate,
    /// Event type we do not act on.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

#[derive(Clone)]
pub struct PaymentService {
    orders: Repository<Order>,
    users: Repository<User>,
    webhook_events: Repository<WebhookEvent>,
    inventory: InventoryService,
    audit: AuditService,
    events: EventPublisher,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Repository<Order>,
        users: Repository<User>,
        webhook_events: Repository<WebhookEvent>,
        inventory: InventoryService,
        audit: AuditService,
        events: EventPublisher,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self { orders, users, webhook_events, inventory, audit, events, gateway }
    }

    fn gateway(&self) -> Result<&Arc<dyn PaymentGateway>> {
        self.gateway.as_ref().ok_or_else(|| EcommerceError::Payment("Payments are not configured".into()))
    }

    /// Creates a payment intent for the caller's own unpaid order, creating
    /// the processor customer on first use.
    pub async fn create_intent(&self, caller: &AuthUser, req: CreateIntent) -> Result<IntentResponse> {
        let gateway = self.gateway()?;
        let order = self.orders.require(req.order_id).await?;
        if order.user_id() != Some(caller.id) {
            return Err(EcommerceError::NotFound("Order"));
        }
        if order.is_paid() {
            return Err(OrderError::AlreadyPaid.into());
        }
        if order.status().is_terminal() {
            return Err(OrderError::NotPayable.into());
        }

        let user = self.users.require(caller.id).await?;
        let customer_id = match user.stripe_customer_id() {
            Some(id) => id.to_string(),
            None => {
                let id = gateway.create_customer(user.email(), user.id()).await?;
                self.users.update(user.id(), |u| { u.set_stripe_customer(id.clone()); Ok(()) }).await?;
                tracing::info!(user_id = %user.id(), customer_id = %id, "payment customer created");
                id
            }
        };

        let amount = order.total().minor_units()?;
        let intent: PaymentIntent = gateway
            .create_payment_intent(IntentRequest {
                amount_minor: amount,
                currency: order.currency(),
                customer_id: &customer_id,
                order_id: order.id(),
                order_number: order.order_number(),
            })
            .await?;
        self.orders.update(order.id(), |o| o.attach_payment_intent(&intent.id).map_err(Into::into)).await?;
        tracing::info!(order_id = %order.id(), intent_id = %intent.id, amount, "payment intent created");
        self.audit
            .record(Some(caller.id), "payment.intent_created", EntityKind::Payment, Some(order.id()), json!({ "intent_id": intent.id, "amount": amount }))
            .await;

        Ok(IntentResponse {
            order_id: order.id(),
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount,
            currency: order.currency().to_string(),
        })
    }

    /// Verifies and applies a processor webhook. Each event id is applied at
    /// most once; a failed event is forgotten so the processor's retry runs again.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        self.gateway()?.verify_webhook(payload, signature)?;
        let event: StripeEvent =
            serde_json::from_slice(payload).map_err(|e| EcommerceError::Validation(format!("Invalid webhook payload: {e}")))?;

        let marker = match self.webhook_events.insert(WebhookEvent::new(&event.id, &event.event_type)).await {
            Ok(marker) => marker,
            Err(EcommerceError::Conflict(_)) => {
                tracing::info!(event_id = %event.id, "duplicate webhook event, skipping");
                return Ok(WebhookOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        };

        let outcome = self.dispatch(&event).await;
        if let Err(e) = &outcome {
            tracing::error!(event_id = %event.id, event_type = %event.event_type, error = %e, "webhook processing failed");
            if let Err(e) = self.webhook_events.delete(marker.id).await {
                tracing::error!(event_id = %event.id, error = %e, "failed to drop webhook marker");
            }
        }
        outcome
    }

    async fn dispatch(&self, event: &StripeEvent) -> Result<WebhookOutcome> {
        let object = &event.data.object;
        match event.event_type.as_str() {
            "payment_intent.succeeded" => {
                let (intent_id, order_id) = intent_refs(object)?;
                self.confirm_payment(order_id, intent_id).await?;
                Ok(WebhookOutcome::Processed)
            }
            "payment_intent.payment_failed" => {
                let (intent_id, order_id) = intent_refs(object)?;
                let reason = object["last_payment_error"]["message"].as_str().unwrap_or("Payment failed").to_string();
                match self.orders.update(order_id, |o| o.mark_payment_failed(reason.clone()).map_err(Into::into)).await {
                    Ok(_) => {
                        tracing::warn!(%order_id, intent_id, reason = %reason, "payment failed");
                        self.audit
                            .record(None, "payment.failed", EntityKind::Payment, Some(order_id), json!({ "intent_id": intent_id, "reason": reason }))
                            .await;
                    }
                    Err(EcommerceError::Order(OrderError::AlreadyPaid)) => {
                        tracing::info!(%order_id, intent_id, "ignoring failure for an order that is already paid");
                    }
                    Err(e) => return Err(e),
                }
                Ok(WebhookOutcome::Processed)
            }
            other => {
                tracing::debug!(event_type = other, "unhandled webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Marks the order paid and turns its reservations into sales. A payment
    /// that was already recorded only finishes any stock work left over from
    /// an earlier attempt; a payment for a cancelled or refunded order never
    /// takes stock.
    pub async fn confirm_payment(&self, order_id: Uuid, intent_id: &str) -> Result<Order> {
        match self.orders.update(order_id, |o| o.mark_paid(intent_id).map_err(Into::into)).await {
            Ok((mut order, _)) => {
                self.events.publish(order.take_events()).await;
                tracing::info!(%order_id, intent_id, status = ?order.status(), "payment confirmed");
                self.audit
                    .record(None, "payment.succeeded", EntityKind::Payment, Some(order_id), json!({ "intent_id": intent_id, "amount": order.total().amount() }))
                    .await;
            }
            Err(EcommerceError::Order(OrderError::AlreadyPaid)) => {
                tracing::info!(%order_id, intent_id, "order already paid");
            }
            Err(EcommerceError::Order(OrderError::NotPayable)) => {
                tracing::error!(%order_id, intent_id, "payment received for a closed order; refund required");
                self.audit
                    .record(None, "payment.received_for_closed_order", EntityKind::Payment, Some(order_id), json!({ "intent_id": intent_id }))
                    .await;
            }
            Err(e) => return Err(e),
        }
        self.inventory.settle_order(&self.orders, order_id, None).await
    }
}

fn intent_refs(object: &Value) -> Result<(&str, Uuid)> {
    let intent_id = object["id"].as_str().ok_or_else(|| EcommerceError::Validation("payment intent id missing".into()))?;
    let order_id = object["metadata"]["order_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| EcommerceError::Validation("payment intent has no order_id metadata".into()))?;
    Ok((intent_id, order_id))
}
