//! Audit trail writer and queries.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::aggregates::{AuditLog, EntityKind};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::Result;

#[derive(Clone)]
pub struct AuditService {
    logs: Repository<AuditLog>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub actor: Option<Uuid>,
    pub action: Option<String>,
}

impl AuditService {
    pub fn new(logs: Repository<AuditLog>) -> Self { Self { logs } }

    /// Best effort: a failed audit write is logged and otherwise ignored.
    pub async fn record(&self, actor: Option<Uuid>, action: &str, entity: EntityKind, entity_id: Option<Uuid>, details: Value) {
        let entry = AuditLog::new(actor, action, entity, entity_id, details);
        if let Err(e) = self.logs.insert(entry).await {
            tracing::error!(action, ?entity, ?entity_id, error = %e, "failed to write audit log");
        }
    }

    pub async fn query(&self, query: AuditQuery, page: Page) -> Result<PaginatedResponse<AuditLog>> {
        let filter = match (query.entity, query.entity_id) {
            (Some(entity), Some(id)) => AuditLog::for_entity(entity, id),
            (entity, id) => Filter::new().eq_opt("entity", entity).eq_opt("entity_id", id),
        };
        let filter = match query.actor {
            Some(actor) => {
                let mut by_actor = AuditLog::by_actor(actor);
                by_actor.contains.extend(filter.contains);
                by_actor
            }
            None => filter,
        };
        self.logs.find(&filter.eq_opt("action", query.action), page).await
    }
}
