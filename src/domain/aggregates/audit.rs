//! Audit trail entries and processed webhook markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::store::{Collection, Document, Filter};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor: Option<Uuid>,
    pub action: String,
    pub entity: EntityKind,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind { User, Product, Order, Ticket, Category, Content, Settings, Media, Payment }

impl Document for AuditLog {
    const COLLECTION: Collection = Collection::AuditLogs;
    fn id(&self) -> Uuid { self.id }
}

impl AuditLog {
    pub fn new(actor: Option<Uuid>, action: impl Into<String>, entity: EntityKind, entity_id: Option<Uuid>, details: serde_json::Value) -> Self {
        Self { id: Uuid::new_v4(), actor, action: action.into(), entity, entity_id, details, at: Utc::now() }
    }

    pub fn for_entity(entity: EntityKind, entity_id: Uuid) -> Filter {
        Filter::new().eq("entity", entity).eq("entity_id", entity_id)
    }

    pub fn by_actor(actor: Uuid) -> Filter { Filter::new().eq("actor", actor) }
}

/// Marker that a payment webhook event has been handled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
}

impl Document for WebhookEvent {
    const COLLECTION: Collection = Collection::WebhookEvents;
    fn id(&self) -> Uuid { self.id }
}

impl WebhookEvent {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), event_id: event_id.into(), event_type: event_type.into(), received_at: Utc::now() }
    }
}
