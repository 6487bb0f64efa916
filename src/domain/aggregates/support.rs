//! Support Ticket Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, TicketEvent};
use crate::store::{Collection, Document};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ticket {
    id: Uuid,
    ticket_number: String,
    user_id: Option<Uuid>,
    email: String,
    subject: String,
    category: TicketCategory,
    priority: TicketPriority,
    status: TicketStatus,
    assigned_to: Option<Uuid>,
    order_id: Option<Uuid>,
    messages: Vec<TicketMessage>,
    status_history: Vec<TicketStatusChange>,
    first_response_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum TicketCategory { Order, Payment, Shipping, Product, Account, #[default] Other }
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum TicketPriority { Low, #[default] Medium, High, Urgent }
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum TicketStatus { #[default] Open, InProgress, WaitingOnCustomer, Resolved, Closed }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct TicketMessage { pub id: Uuid, pub author: Option<Uuid>, pub from_staff: bool, pub body: String, pub internal: bool, pub at: DateTime<Utc> }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct TicketStatusChange { pub status: TicketStatus, pub note: Option<String>, pub actor: Option<Uuid>, pub at: DateTime<Utc> }

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Low => "low", Self::Medium => "medium", Self::High => "high", Self::Urgent => "urgent" }
    }

    /// Time allowed until the first staff reply.
    pub fn response_target(&self) -> Duration {
        match self { Self::Urgent => Duration::hours(1), Self::High => Duration::hours(4), Self::Medium => Duration::hours(8), Self::Low => Duration::hours(24) }
    }

    /// Time allowed until the ticket is resolved.
    pub fn resolution_target(&self) -> Duration {
        match self { Self::Urgent => Duration::hours(4), Self::High => Duration::hours(24), Self::Medium => Duration::hours(48), Self::Low => Duration::hours(72) }
    }
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::WaitingOnCustomer => "waiting_on_customer",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Open, InProgress | WaitingOnCustomer | Resolved | Closed)
                | (InProgress, Open | WaitingOnCustomer | Resolved | Closed)
                | (WaitingOnCustomer, InProgress | Resolved | Closed)
                | (Resolved, Open | Closed)
                | (Closed, Open)
        )
    }

    pub fn is_active(self) -> bool { !matches!(self, Self::Resolved | Self::Closed) }
}

/// SLA figures derived from the ticket's timestamps.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlaStatus {
    pub first_response_due_at: DateTime<Utc>,
    pub resolution_due_at: DateTime<Utc>,
    pub response_breached: bool,
    pub is_overdue: bool,
    pub response_minutes: Option<i64>,
    pub resolution_minutes: Option<i64>,
}

impl Document for Ticket {
    const COLLECTION: Collection = Collection::Tickets;
    fn id(&self) -> Uuid { self.id }
}

impl Ticket {
    pub fn open(user_id: Option<Uuid>, email: impl Into<String>, subject: impl Into<String>, body: impl Into<String>, category: TicketCategory, priority: TicketPriority) -> Result<Self, TicketError> {
        let subject = subject.into();
        let body = body.into();
        if subject.trim().is_empty() || body.trim().is_empty() { return Err(TicketError::EmptyMessage); }
        let now = Utc::now();
        let id = Uuid::new_v4();
        let ticket_number = format!("TCK-{:08}", rand::random::<u32>() % 100_000_000);
        let mut ticket = Self {
            id, ticket_number: ticket_number.clone(), user_id, email: email.into().trim().to_lowercase(), subject, category, priority,
            status: TicketStatus::Open, assigned_to: None, order_id: None,
            messages: vec![TicketMessage { id: Uuid::new_v4(), author: user_id, from_staff: false, body, internal: false, at: now }],
            status_history: vec![TicketStatusChange { status: TicketStatus::Open, note: None, actor: user_id, at: now }],
            first_response_at: None, resolved_at: None, closed_at: None, created_at: now, updated_at: now, events: vec![],
        };
        ticket.raise_event(DomainEvent::Ticket(TicketEvent::Opened { ticket_id: id, ticket_number, priority: priority.as_str().into() }));
        Ok(ticket)
    }

    pub fn with_order(mut self, order_id: Option<Uuid>) -> Self { self.order_id = order_id; self }

    pub fn id(&self) -> Uuid { self.id }
    pub fn ticket_number(&self) -> &str { &self.ticket_number }
    pub fn user_id(&self) -> Option<Uuid> { self.user_id }
    pub fn subject(&self) -> &str { &self.subject }
    pub fn priority(&self) -> TicketPriority { self.priority }
    pub fn status(&self) -> TicketStatus { self.status }
    pub fn assigned_to(&self) -> Option<Uuid> { self.assigned_to }
    pub fn messages(&self) -> &[TicketMessage] { &self.messages }
    pub fn status_history(&self) -> &[TicketStatusChange] { &self.status_history }
    pub fn first_response_at(&self) -> Option<DateTime<Utc>> { self.first_response_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// Copy of the ticket with staff-only notes removed.
    pub fn public_view(&self) -> Ticket {
        let mut view = self.clone();
        view.messages.retain(|m| !m.internal);
        view
    }

    pub fn add_message(&mut self, author: Option<Uuid>, from_staff: bool, body: impl Into<String>, internal: bool) -> Result<Uuid, TicketError> {
        let body = body.into();
        if body.trim().is_empty() { return Err(TicketError::EmptyMessage); }
        if internal && !from_staff { return Err(TicketError::InternalNoteByCustomer); }
        if self.status == TicketStatus::Closed && !from_staff { return Err(TicketError::Closed); }
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.messages.push(TicketMessage { id, author, from_staff, body, internal, at: now });
        if from_staff && !internal && self.first_response_at.is_none() {
            self.first_response_at = Some(now);
        }
        if !from_staff && self.status == TicketStatus::WaitingOnCustomer {
            self.update_status(TicketStatus::InProgress, Some("Customer replied".into()), author)?;
        }
        self.touch();
        Ok(id)
    }

    pub fn update_status(&mut self, next: TicketStatus, note: Option<String>, actor: Option<Uuid>) -> Result<(), TicketError> {
        if !self.status.can_transition_to(next) {
            return Err(TicketError::InvalidTransition { from: self.status.as_str(), to: next.as_str() });
        }
        let previous = self.status;
        let now = Utc::now();
        self.status = next;
        match next {
            TicketStatus::Resolved => self.resolved_at = Some(now),
            TicketStatus::Closed => {
                self.closed_at = Some(now);
                self.resolved_at.get_or_insert(now);
            }
            TicketStatus::Open => { self.resolved_at = None; self.closed_at = None; }
            TicketStatus::InProgress | TicketStatus::WaitingOnCustomer => {}
        }
        self.status_history.push(TicketStatusChange { status: next, note, actor, at: now });
        self.touch();
        self.raise_event(DomainEvent::Ticket(TicketEvent::StatusChanged { ticket_id: self.id, from: previous.as_str().into(), to: next.as_str().into() }));
        Ok(())
    }

    pub fn assign(&mut self, staff_id: Option<Uuid>, actor: Option<Uuid>) -> Result<(), TicketError> {
        self.assigned_to = staff_id;
        if staff_id.is_some() && self.status == TicketStatus::Open {
            self.update_status(TicketStatus::InProgress, Some("Assigned".into()), actor)?;
        }
        self.touch();
        Ok(())
    }

    pub fn set_priority(&mut self, priority: TicketPriority) { self.priority = priority; self.touch(); }

    pub fn first_response_due_at(&self) -> DateTime<Utc> { self.created_at + self.priority.response_target() }
    pub fn sla_due_at(&self) -> DateTime<Utc> { self.created_at + self.priority.resolution_target() }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && now > self.sla_due_at()
    }

    pub fn sla(&self, now: DateTime<Utc>) -> SlaStatus {
        let response_breached = match self.first_response_at {
            Some(at) => at > self.first_response_due_at(),
            None => self.status.is_active() && now > self.first_response_due_at(),
        };
        SlaStatus {
            first_response_due_at: self.first_response_due_at(),
            resolution_due_at: self.sla_due_at(),
            response_breached,
            is_overdue: self.is_overdue(now),
            response_minutes: self.first_response_at.map(|at| (at - self.created_at).num_minutes()),
            resolution_minutes: self.resolved_at.map(|at| (at - self.created_at).num_minutes()),
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) { self.created_at -= by; }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketError {
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Only staff can add internal notes")]
    InternalNoteByCustomer,
    #[error("Ticket is closed")]
    Closed,
    #[error("Cannot move ticket from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}
