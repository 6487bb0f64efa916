//! Support tickets with response and resolution SLAs.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::support::SlaStatus;
use crate::domain::aggregates::{EntityKind, Order, Ticket, TicketCategory, TicketPriority, TicketStatus};
use crate::events::EventPublisher;
use crate::services::{AuditService, AuthUser};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTicket {
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    #[validate(length(min = 1, max = 10000))]
    pub message: String,
    #[serde(default)]
    pub category: TicketCategory,
    #[serde(default)]
    pub priority: TicketPriority,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub body: String,
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketQuery {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub category: Option<TicketCategory>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    #[serde(default)]
    pub overdue_only: bool,
}

/// A ticket with its SLA figures evaluated now.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub sla: SlaStatus,
}

impl TicketView {
    fn staff(ticket: Ticket) -> Self {
        let sla = ticket.sla(Utc::now());
        Self { ticket, sla }
    }

    fn customer(ticket: &Ticket) -> Self {
        let sla = ticket.sla(Utc::now());
        Self { ticket: ticket.public_view(), sla }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportStats {
    pub total: u64,
    pub open: u64,
    pub overdue: u64,
    pub response_breached: u64,
    pub by_status: BTreeMap<&'static str, u64>,
    pub by_priority: BTreeMap<&'static str, u64>,
    pub average_first_response_minutes: Option<i64>,
}

#[derive(Clone)]
pub struct SupportService {
    tickets: Repository<Ticket>,
    orders: Repository<Order>,
    audit: AuditService,
    events: EventPublisher,
}

impl SupportService {
    pub fn new(tickets: Repository<Ticket>, orders: Repository<Order>, audit: AuditService, events: EventPublisher) -> Self {
        Self { tickets, orders, audit, events }
    }

    pub async fn open(&self, customer: &AuthUser, req: CreateTicket) -> Result<TicketView> {
        req.validate()?;
        if let Some(order_id) = req.order_id {
            let order = self.orders.require(order_id).await?;
            if order.user_id() != Some(customer.id) {
                return Err(EcommerceError::NotFound("Order"));
            }
        }
        let ticket = Ticket::open(Some(customer.id), &customer.email, req.subject.trim(), req.message, req.category, req.priority)?
            .with_order(req.order_id);
        let mut ticket = self.tickets.insert(ticket).await?;
        tracing::info!(ticket_id = %ticket.id(), ticket_number = %ticket.ticket_number(), priority = ?ticket.priority(), "ticket opened");
        self.events.publish(ticket.take_events()).await;
        Ok(TicketView::customer(&ticket))
    }

    /// Staff get the full ticket; customers only their own, without internal notes.
    pub async fn get_for(&self, id: Uuid, caller: &AuthUser) -> Result<TicketView> {
        let ticket = self.tickets.require(id).await?;
        if caller.is_staff() {
            Ok(TicketView::staff(ticket))
        } else if ticket.user_id() == Some(caller.id) {
            Ok(TicketView::customer(&ticket))
        } else {
            Err(EcommerceError::NotFound("Ticket"))
        }
    }

    pub async fn list_for_customer(&self, customer: &AuthUser, page: Page) -> Result<PaginatedResponse<TicketView>> {
        let found = self.tickets.find(&Filter::new().eq("user_id", customer.id), page).await?;
        Ok(PaginatedResponse { data: found.data.iter().map(TicketView::customer).collect(), total: found.total, page: found.page })
    }

    pub async fn list(&self, query: TicketQuery, page: Page) -> Result<PaginatedResponse<TicketView>> {
        let filter = Filter::new()
            .eq_opt("status", query.status)
            .eq_opt("priority", query.priority)
            .eq_opt("category", query.category)
            .eq_opt("assigned_to", query.assigned_to)
            .search(&["subject", "ticket_number", "email"], query.search.as_deref());
        if !query.overdue_only {
            let found = self.tickets.find(&filter, page).await?;
            return Ok(PaginatedResponse { data: found.data.into_iter().map(TicketView::staff).collect(), total: found.total, page: found.page });
        }
        // Overdue depends on the clock, so it is evaluated here.
        let now = Utc::now();
        let overdue: Vec<Ticket> = self.tickets.find_all(&filter).await?.into_iter().filter(|t| t.is_overdue(now)).collect();
        let total = overdue.len() as u64;
        let data = overdue.into_iter().skip(page.offset() as usize).take(page.limit() as usize).map(TicketView::staff).collect();
        Ok(PaginatedResponse { data, total, page: page.page })
    }

    pub async fn add_message(&self, id: Uuid, caller: &AuthUser, msg: NewMessage) -> Result<TicketView> {
        let from_staff = caller.is_staff();
        let (mut ticket, message_id) = self
            .tickets
            .update(id, |t| {
                if !from_staff && t.user_id() != Some(caller.id) {
                    return Err(EcommerceError::NotFound("Ticket"));
                }
                t.add_message(Some(caller.id), from_staff, msg.body.clone(), msg.internal).map_err(Into::into)
            })
            .await?;
        self.events.publish(ticket.take_events()).await;
        tracing::debug!(ticket_id = %id, %message_id, from_staff, internal = msg.internal, "ticket message added");
        Ok(if from_staff { TicketView::staff(ticket) } else { TicketView::customer(&ticket) })
    }

    pub async fn update_status(&self, id: Uuid, next: TicketStatus, note: Option<String>, actor: &AuthUser) -> Result<TicketView> {
        let (mut ticket, previous) = self
            .tickets
            .update(id, |t| {
                let previous = t.status();
                t.update_status(next, note.clone(), Some(actor.id))?;
                Ok(previous)
            })
            .await?;
        self.events.publish(ticket.take_events()).await;
        self.audit
            .record(Some(actor.id), "ticket.status_changed", EntityKind::Ticket, Some(id), json!({ "from": previous, "to": next, "note": note }))
            .await;
        Ok(TicketView::staff(ticket))
    }

    pub async fn assign(&self, id: Uuid, staff_id: Option<Uuid>, actor: &AuthUser) -> Result<TicketView> {
        let (mut ticket, _) = self.tickets.update(id, |t| t.assign(staff_id, Some(actor.id)).map_err(Into::into)).await?;
        self.events.publish(ticket.take_events()).await;
        self.audit.record(Some(actor.id), "ticket.assigned", EntityKind::Ticket, Some(id), json!({ "assigned_to": staff_id })).await;
        Ok(TicketView::staff(ticket))
    }

    pub async fn set_priority(&self, id: Uuid, priority: TicketPriority, actor: &AuthUser) -> Result<TicketView> {
        let (ticket, _) = self.tickets.update(id, |t| { t.set_priority(priority); Ok(()) }).await?;
        self.audit.record(Some(actor.id), "ticket.priority_changed", EntityKind::Ticket, Some(id), json!({ "priority": priority })).await;
        Ok(TicketView::staff(ticket))
    }

    pub async fn stats(&self) -> Result<SupportStats> {
        let now = Utc::now();
        let tickets = self.tickets.find_all(&Filter::new()).await?;
        let mut stats = SupportStats {
            total: tickets.len() as u64,
            open: 0,
            overdue: 0,
            response_breached: 0,
            by_status: BTreeMap::new(),
            by_priority: BTreeMap::new(),
            average_first_response_minutes: None,
        };
        let mut response_minutes = Vec::new();
        for ticket in &tickets {
            let sla = ticket.sla(now);
            if ticket.status().is_active() { stats.open += 1; }
            if sla.is_overdue { stats.overdue += 1; }
            if sla.response_breached { stats.response_breached += 1; }
            *stats.by_status.entry(ticket.status().as_str()).or_insert(0) += 1;
            *stats.by_priority.entry(ticket.priority().as_str()).or_insert(0) += 1;
            response_minutes.extend(sla.response_minutes);
        }
        if !response_minutes.is_empty() {
            stats.average_first_response_minutes = Some(response_minutes.iter().sum::<i64>() / response_minutes.len() as i64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestApp;

    fn ticket(subject: &str, priority: TicketPriority) -> CreateTicket {
        CreateTicket { subject: subject.into(), message: "Where is my parcel?".into(), category: TicketCategory::Shipping, priority, order_id: None }
    }

    #[tokio::test]
    async fn test_customer_never_sees_internal_notes() {
        let app = TestApp::new().await;
        let customer = app.customer("help@example.com").await;
        let staff = app.admin().await;
        let support = &app.services.support;

        let opened = support.open(&customer, ticket("Late delivery", TicketPriority::High)).await.unwrap();
        let id = opened.ticket.id();
        support.add_message(id, &staff, NewMessage { body: "Carrier issue, escalate".into(), internal: true }).await.unwrap();
        support.add_message(id, &staff, NewMessage { body: "We are on it".into(), internal: false }).await.unwrap();

        let customer_view = support.get_for(id, &customer).await.unwrap();
        assert_eq!(customer_view.ticket.messages().len(), 2);
        assert!(customer_view.ticket.messages().iter().all(|m| !m.internal));
        let staff_view = support.get_for(id, &staff).await.unwrap();
        assert_eq!(staff_view.ticket.messages().len(), 3);
        assert!(staff_view.ticket.first_response_at().is_some());
    }

    #[tokio::test]
    async fn test_customer_cannot_post_internal_or_to_others() {
        let app = TestApp::new().await;
        let customer = app.customer("a@example.com").await;
        let stranger = app.customer("b@example.com").await;
        let support = &app.services.support;
        let id = support.open(&customer, ticket("Refund", TicketPriority::Low)).await.unwrap().ticket.id();

        let internal = support.add_message(id, &customer, NewMessage { body: "psst".into(), internal: true }).await;
        assert!(matches!(internal, Err(EcommerceError::Ticket(_))));
        let foreign = support.add_message(id, &stranger, NewMessage { body: "hi".into(), internal: false }).await;
        assert!(matches!(foreign, Err(EcommerceError::NotFound(_))));
        assert!(support.get_for(id, &stranger).await.is_err());
    }

    #[tokio::test]
    async fn test_status_flow_and_stats() {
        let app = TestApp::new().await;
        let customer = app.customer("a@example.com").await;
        let staff = app.admin().await;
        let support = &app.services.support;
        let id = support.open(&customer, ticket("Broken zip", TicketPriority::Urgent)).await.unwrap().ticket.id();

        let assigned = support.assign(id, Some(staff.id), &staff).await.unwrap();
        assert_eq!(assigned.ticket.status(), TicketStatus::InProgress);
        support.update_status(id, TicketStatus::Resolved, Some("Replaced".into()), &staff).await.unwrap();
        let invalid = support.update_status(id, TicketStatus::WaitingOnCustomer, None, &staff).await;
        assert!(matches!(invalid, Err(EcommerceError::Ticket(_))));

        support.open(&customer, ticket("Another", TicketPriority::Low)).await.unwrap();
        let stats = support.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.by_priority.get("urgent"), Some(&1));
    }

    #[tokio::test]
    async fn test_ticket_linked_to_foreign_order_rejected() {
        let app = TestApp::new().await;
        let customer = app.customer("a@example.com").await;
        let mut req = ticket("Order issue", TicketPriority::Medium);
        req.order_id = Some(Uuid::new_v4());
        assert!(matches!(app.services.support.open(&customer, req).await, Err(EcommerceError::NotFound("Order"))));
    }
}
