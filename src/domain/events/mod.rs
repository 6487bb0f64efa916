//! Domain events
use crate::domain::value_objects::Sku;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Ticket(TicketEvent),
}

impl DomainEvent {
    /// Subject suffix used when the event is published on the bus.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::Created { .. }) => "product.created",
            Self::Product(ProductEvent::Published { .. }) => "product.published",
            Self::Product(ProductEvent::StockChanged { .. }) => "product.stock_changed",
            Self::Product(ProductEvent::LowStock { .. }) => "product.low_stock",
            Self::Order(OrderEvent::Created { .. }) => "order.created",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Order(OrderEvent::ReturnRequested { .. }) => "order.return_requested",
            Self::Order(OrderEvent::Refunded { .. }) => "order.refunded",
            Self::Ticket(TicketEvent::Opened { .. }) => "ticket.opened",
            Self::Ticket(TicketEvent::StatusChanged { .. }) => "ticket.status_changed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, sku: Sku },
    Published { product_id: Uuid },
    StockChanged { product_id: Uuid, sku: Sku, delta: i64, available: u32 },
    LowStock { product_id: Uuid, sku: Sku, available: u32, reorder_point: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: String, total: Decimal },
    StatusChanged { order_id: Uuid, from: String, to: String },
    Paid { order_id: Uuid, intent_id: String },
    ReturnRequested { order_id: Uuid, return_id: Uuid },
    Refunded { order_id: Uuid, refund_id: Uuid, amount: Decimal },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    Opened { ticket_id: Uuid, ticket_number: String, priority: String },
    StatusChanged { ticket_id: Uuid, from: String, to: String },
}
