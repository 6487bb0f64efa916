//! Order Aggregate
//!
//! Totals are recomputed on every save:
//! `total = subtotal + tax.amount + shipping.cost - discount.amount`.
//! Returns and refunds are sub state machines with their own history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::{Money, Sku};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::store::{Collection, Document};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: Option<Uuid>,
    email: String,
    currency: String,
    status: OrderStatus,
    status_history: Vec<StatusChange>,
    timestamps: OrderTimestamps,
    payment: PaymentInfo,
    items: Vec<LineItem>,
    subtotal: Money,
    shipping: Shipping,
    tax: Tax,
    discount: Discount,
    total: Money,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    notes: Option<String>,
    stock_state: StockState,
    returns: Vec<ReturnRequest>,
    refunds: Vec<Refund>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct LineItem { pub id: Uuid, pub product_id: Uuid, pub variant_sku: Option<Sku>, pub name: String, pub sku: Sku, pub quantity: u32, pub unit_price: Money, pub total: Money }
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)] pub struct Address { #[validate(length(min = 1))] pub name: String, #[validate(length(min = 1))] pub street1: String, pub street2: Option<String>, #[validate(length(min = 1))] pub city: String, pub state: Option<String>, #[validate(length(min = 1))] pub zip: String, #[validate(length(min = 2))] pub country: String }
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Refunded }
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum PaymentStatus { #[default] Pending, Paid, Failed, PartiallyRefunded, Refunded }
/// Where the order's stock bookkeeping stands. The `-ing` states are claimed
/// work that has not yet reached every product.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockState { #[default] Reserved, Committing, Committed, Releasing, Restocking, Released }

impl StockState {
    pub fn is_settling(self) -> bool { matches!(self, Self::Committing | Self::Releasing | Self::Restocking) }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct StatusChange { pub status: OrderStatus, pub note: Option<String>, pub actor: Option<Uuid>, pub at: DateTime<Utc> }
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)] pub struct OrderTimestamps { pub confirmed_at: Option<DateTime<Utc>>, pub processing_at: Option<DateTime<Utc>>, pub shipped_at: Option<DateTime<Utc>>, pub delivered_at: Option<DateTime<Utc>>, pub cancelled_at: Option<DateTime<Utc>>, pub refunded_at: Option<DateTime<Utc>> }
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)] pub struct PaymentInfo { pub method: String, pub status: PaymentStatus, pub intent_id: Option<String>, pub paid_at: Option<DateTime<Utc>>, pub failure_reason: Option<String> }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct Shipping { pub method: String, pub cost: Money, pub carrier: Option<String>, pub tracking_number: Option<String> }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct Tax { pub rate: Decimal, pub amount: Money }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct Discount { pub code: Option<String>, pub amount: Money }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Processing | Cancelled)
                | (Confirmed, Processing | Cancelled | Refunded)
                | (Processing, Shipped | Cancelled | Refunded)
                | (Shipped, Delivered)
                | (Delivered, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool { matches!(self, Self::Cancelled | Self::Refunded) }
}

// ── Returns ──

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum ReturnStatus { Requested, Approved, Rejected, Received, Completed }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct ReturnItem { pub product_id: Uuid, pub variant_sku: Option<Sku>, pub quantity: u32 }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct ReturnStatusChange { pub status: ReturnStatus, pub note: Option<String>, pub actor: Option<Uuid>, pub at: DateTime<Utc> }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub items: Vec<ReturnItem>,
    pub reason: String,
    pub status: ReturnStatus,
    pub history: Vec<ReturnStatusChange>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub restocked: bool,
}

impl ReturnStatus {
    pub fn can_transition_to(self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!((self, next), (Requested, Approved | Rejected) | (Approved, Received | Rejected) | (Received, Completed))
    }
}

// ── Refunds ──

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum RefundStatus { Pending, Processed, Failed }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct RefundStatusChange { pub status: RefundStatus, pub note: Option<String>, pub at: DateTime<Utc> }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub external_id: Option<String>,
    pub requested_by: Option<Uuid>,
    pub history: Vec<RefundStatusChange>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document for Order {
    const COLLECTION: Collection = Collection::Orders;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) { self.recalculate(); }
}

impl Order {
    pub fn create(user_id: Option<Uuid>, email: impl Into<String>, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), order_number: format!("ORD-{:08}", rand::random::<u32>() % 100_000_000),
            user_id, email: email.into().trim().to_lowercase(), currency: currency.to_uppercase(),
            status: OrderStatus::Pending, status_history: vec![], timestamps: OrderTimestamps::default(),
            payment: PaymentInfo { method: "card".into(), ..PaymentInfo::default() }, items: vec![],
            subtotal: Money::zero(currency), shipping: Shipping { method: "standard".into(), cost: Money::zero(currency), carrier: None, tracking_number: None },
            tax: Tax { rate: Decimal::ZERO, amount: Money::zero(currency) }, discount: Discount { code: None, amount: Money::zero(currency) },
            total: Money::zero(currency), shipping_address: None, billing_address: None, notes: None,
            stock_state: StockState::Reserved, returns: vec![], refunds: vec![], created_at: now, updated_at: now, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> Option<Uuid> { self.user_id }
    pub fn email(&self) -> &str { &self.email }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn status_history(&self) -> &[StatusChange] { &self.status_history }
    pub fn timestamps(&self) -> &OrderTimestamps { &self.timestamps }
    pub fn payment(&self) -> &PaymentInfo { &self.payment }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn shipping(&self) -> &Shipping { &self.shipping }
    pub fn tax(&self) -> &Tax { &self.tax }
    pub fn discount(&self) -> &Discount { &self.discount }
    pub fn total(&self) -> &Money { &self.total }
    pub fn stock_state(&self) -> StockState { self.stock_state }
    pub fn returns(&self) -> &[ReturnRequest] { &self.returns }
    pub fn refunds(&self) -> &[Refund] { &self.refunds }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn is_paid(&self) -> bool { matches!(self.payment.status, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded) }

    pub fn add_item(&mut self, item: LineItem) -> Result<(), OrderError> {
        self.ensure_editable()?;
        if item.quantity == 0 { return Err(OrderError::InvalidQuantity); }
        if item.unit_price.currency() != self.currency { return Err(OrderError::CurrencyMismatch); }
        self.items.push(item);
        self.recalculate();
        Ok(())
    }

    pub fn set_addresses(&mut self, shipping: Address, billing: Option<Address>) { self.shipping_address = Some(shipping); self.billing_address = billing; self.touch(); }
    pub fn set_notes(&mut self, notes: Option<String>) { self.notes = notes; self.touch(); }

    pub fn set_shipping(&mut self, method: impl Into<String>, cost: Money) -> Result<(), OrderError> {
        self.ensure_editable()?;
        if cost.currency() != self.currency || cost.is_negative() { return Err(OrderError::CurrencyMismatch); }
        self.shipping.method = method.into();
        self.shipping.cost = cost;
        self.recalculate();
        Ok(())
    }

    pub fn set_tax_rate(&mut self, rate: Decimal) -> Result<(), OrderError> {
        self.ensure_editable()?;
        if rate.is_sign_negative() { return Err(OrderError::InvalidTaxRate); }
        self.tax.rate = rate;
        self.recalculate();
        Ok(())
    }

    /// Applies a fixed discount; it may not exceed the subtotal.
    pub fn apply_discount(&mut self, code: Option<String>, amount: Money) -> Result<(), OrderError> {
        self.ensure_editable()?;
        self.recalculate();
        if amount.currency() != self.currency || amount.is_negative() || amount.amount() > self.subtotal.amount() {
            return Err(OrderError::InvalidDiscount);
        }
        self.discount = Discount { code, amount };
        self.recalculate();
        Ok(())
    }

    /// Finalises a freshly built order.
    pub fn place(&mut self) -> Result<(), OrderError> {
        if self.items.is_empty() { return Err(OrderError::NoItems); }
        if !self.status_history.is_empty() { return Err(OrderError::NotEditable); }
        self.recalculate();
        self.status_history.push(StatusChange { status: OrderStatus::Pending, note: Some("Order placed".into()), actor: self.user_id, at: Utc::now() });
        self.raise_event(DomainEvent::Order(OrderEvent::Created { order_id: self.id, order_number: self.order_number.clone(), total: self.total.amount() }));
        Ok(())
    }

    pub fn update_status(&mut self, next: OrderStatus, note: Option<String>, actor: Option<Uuid>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition { from: self.status.as_str(), to: next.as_str() });
        }
        let previous = self.status;
        let now = Utc::now();
        self.status = next;
        match next {
            OrderStatus::Confirmed => self.timestamps.confirmed_at = Some(now),
            OrderStatus::Processing => self.timestamps.processing_at = Some(now),
            OrderStatus::Shipped => self.timestamps.shipped_at = Some(now),
            OrderStatus::Delivered => self.timestamps.delivered_at = Some(now),
            OrderStatus::Cancelled => self.timestamps.cancelled_at = Some(now),
            OrderStatus::Refunded => self.timestamps.refunded_at = Some(now),
            OrderStatus::Pending => {}
        }
        self.status_history.push(StatusChange { status: next, note, actor, at: now });
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, from: previous.as_str().into(), to: next.as_str().into() }));
        Ok(())
    }

    /// Claims the stock work the order's status and payment now call for.
    /// Work claimed earlier and never finished is handed out again.
    pub fn claim_stock_work(&mut self) -> Option<StockState> {
        let shipped = matches!(self.status, OrderStatus::Shipped | OrderStatus::Delivered);
        let next = match self.stock_state {
            state if state.is_settling() => return Some(state),
            StockState::Reserved if self.status.is_terminal() => StockState::Releasing,
            StockState::Reserved if self.is_paid() || shipped => StockState::Committing,
            StockState::Committed if self.status == OrderStatus::Cancelled => StockState::Restocking,
            _ => return None,
        };
        self.stock_state = next;
        self.touch();
        Some(next)
    }

    /// Settles claimed work once every product reflects it. Returns false when
    /// the claim is no longer the current one.
    pub fn finish_stock_work(&mut self, claimed: StockState) -> bool {
        if self.stock_state != claimed || !claimed.is_settling() { return false; }
        self.stock_state = match claimed {
            StockState::Committing => StockState::Committed,
            _ => StockState::Released,
        };
        self.touch();
        true
    }

    pub fn attach_payment_intent(&mut self, intent_id: impl Into<String>) -> Result<(), OrderError> {
        if self.status.is_terminal() { return Err(OrderError::NotPayable); }
        if self.is_paid() { return Err(OrderError::AlreadyPaid); }
        self.payment.intent_id = Some(intent_id.into());
        self.payment.status = PaymentStatus::Pending;
        self.payment.failure_reason = None;
        self.touch();
        Ok(())
    }

    /// Marks the order paid and confirms it when it was still pending.
    pub fn mark_paid(&mut self, intent_id: &str) -> Result<(), OrderError> {
        if self.is_paid() { return Err(OrderError::AlreadyPaid); }
        if self.status.is_terminal() { return Err(OrderError::NotPayable); }
        self.payment.status = PaymentStatus::Paid;
        self.payment.intent_id = Some(intent_id.to_string());
        self.payment.paid_at = Some(Utc::now());
        self.payment.failure_reason = None;
        if self.status == OrderStatus::Pending {
            self.update_status(OrderStatus::Confirmed, Some("Payment received".into()), None)?;
        }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id, intent_id: intent_id.to_string() }));
        Ok(())
    }

    pub fn mark_payment_failed(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if self.is_paid() { return Err(OrderError::AlreadyPaid); }
        self.payment.status = PaymentStatus::Failed;
        self.payment.failure_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Stores carrier details; a processing order becomes shipped.
    pub fn set_tracking(&mut self, carrier: impl Into<String>, tracking_number: impl Into<String>, actor: Option<Uuid>) -> Result<(), OrderError> {
        if self.status.is_terminal() { return Err(OrderError::NotEditable); }
        self.shipping.carrier = Some(carrier.into());
        self.shipping.tracking_number = Some(tracking_number.into());
        if self.status == OrderStatus::Processing {
            let note = format!("Tracking {}", self.shipping.tracking_number.as_deref().unwrap_or_default());
            self.update_status(OrderStatus::Shipped, Some(note), actor)?;
        }
        self.touch();
        Ok(())
    }

    // ── Returns ──

    /// Units of a line already covered by non-rejected returns.
    pub fn returned_quantity(&self, product_id: Uuid, variant_sku: Option<&Sku>) -> u32 {
        self.returns
            .iter()
            .filter(|r| r.status != ReturnStatus::Rejected)
            .flat_map(|r| r.items.iter())
            .filter(|i| i.product_id == product_id && i.variant_sku.as_ref() == variant_sku)
            .map(|i| i.quantity)
            .sum()
    }

    pub fn request_return(&mut self, items: Vec<ReturnItem>, reason: impl Into<String>, actor: Option<Uuid>) -> Result<Uuid, OrderError> {
        if self.status != OrderStatus::Delivered { return Err(OrderError::ReturnNotAllowed); }
        if items.is_empty() { return Err(OrderError::NoItems); }
        for item in &items {
            let ordered: u32 = self
                .items
                .iter()
                .filter(|l| l.product_id == item.product_id && l.variant_sku == item.variant_sku)
                .map(|l| l.quantity)
                .sum();
            if ordered == 0 { return Err(OrderError::ReturnItemNotInOrder(item.product_id)); }
            let requested: u32 = items
                .iter()
                .filter(|i| i.product_id == item.product_id && i.variant_sku == item.variant_sku)
                .map(|i| i.quantity)
                .sum();
            let returnable = ordered.saturating_sub(self.returned_quantity(item.product_id, item.variant_sku.as_ref()));
            if item.quantity == 0 || requested > returnable {
                return Err(OrderError::ReturnQuantityExceeded { product_id: item.product_id, requested, returnable });
            }
        }
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.returns.push(ReturnRequest {
            id, items, reason: reason.into(), status: ReturnStatus::Requested,
            history: vec![ReturnStatusChange { status: ReturnStatus::Requested, note: None, actor, at: now }], requested_at: now,
            restocked: false,
        });
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::ReturnRequested { order_id: self.id, return_id: id }));
        Ok(id)
    }

    pub fn update_return_status(&mut self, return_id: Uuid, next: ReturnStatus, note: Option<String>, actor: Option<Uuid>) -> Result<ReturnRequest, OrderError> {
        let request = self.returns.iter_mut().find(|r| r.id == return_id).ok_or(OrderError::ReturnNotFound)?;
        if !request.status.can_transition_to(next) {
            return Err(OrderError::InvalidReturnTransition { from: request.status, to: next });
        }
        request.status = next;
        request.history.push(ReturnStatusChange { status: next, note, actor, at: Utc::now() });
        let snapshot = request.clone();
        self.touch();
        Ok(snapshot)
    }

    /// Received returns whose units are not back in stock yet.
    pub fn returns_to_restock(&self) -> Vec<ReturnRequest> {
        self.returns
            .iter()
            .filter(|r| matches!(r.status, ReturnStatus::Received | ReturnStatus::Completed) && !r.restocked)
            .cloned()
            .collect()
    }

    pub fn mark_return_restocked(&mut self, return_id: Uuid) {
        if let Some(request) = self.returns.iter_mut().find(|r| r.id == return_id) {
            request.restocked = true;
            self.touch();
        }
    }

    // ── Refunds ──

    /// Sum of refunds that have not failed.
    pub fn committed_refunds(&self) -> Money {
        self.refunds
            .iter()
            .filter(|r| r.status != RefundStatus::Failed)
            .fold(Money::zero(&self.currency), |acc, r| acc.add(&r.amount).unwrap_or(acc))
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunds
            .iter()
            .filter(|r| r.status == RefundStatus::Processed)
            .fold(Money::zero(&self.currency), |acc, r| acc.add(&r.amount).unwrap_or(acc))
    }

    pub fn request_refund(&mut self, amount: Decimal, reason: impl Into<String>, actor: Option<Uuid>) -> Result<Uuid, OrderError> {
        if !matches!(self.payment.status, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded) { return Err(OrderError::NotPaid); }
        if amount <= Decimal::ZERO { return Err(OrderError::InvalidRefundAmount); }
        let refundable = self.total.amount() - self.committed_refunds().amount();
        if amount > refundable { return Err(OrderError::RefundExceedsTotal { requested: amount, refundable }); }
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.refunds.push(Refund {
            id, amount: Money::new(amount, &self.currency), reason: reason.into(), status: RefundStatus::Pending,
            external_id: None, requested_by: actor, history: vec![RefundStatusChange { status: RefundStatus::Pending, note: None, at: now }],
            created_at: now, processed_at: None,
        });
        self.touch();
        Ok(id)
    }

    pub fn complete_refund(&mut self, refund_id: Uuid, external_id: Option<String>) -> Result<Refund, OrderError> {
        let now = Utc::now();
        let refund = self.refunds.iter_mut().find(|r| r.id == refund_id).ok_or(OrderError::RefundNotFound)?;
        if refund.status != RefundStatus::Pending { return Err(OrderError::RefundNotPending); }
        refund.status = RefundStatus::Processed;
        refund.external_id = external_id;
        refund.processed_at = Some(now);
        refund.history.push(RefundStatusChange { status: RefundStatus::Processed, note: None, at: now });
        let snapshot = refund.clone();

        let fully_refunded = self.refunded_amount().amount() >= self.total.amount();
        self.payment.status = if fully_refunded { PaymentStatus::Refunded } else { PaymentStatus::PartiallyRefunded };
        if fully_refunded && self.status.can_transition_to(OrderStatus::Refunded) {
            self.update_status(OrderStatus::Refunded, Some(snapshot.reason.clone()), snapshot.requested_by)?;
        }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Refunded { order_id: self.id, refund_id, amount: snapshot.amount.amount() }));
        Ok(snapshot)
    }

    pub fn fail_refund(&mut self, refund_id: Uuid, reason: impl Into<String>) -> Result<(), OrderError> {
        let refund = self.refunds.iter_mut().find(|r| r.id == refund_id).ok_or(OrderError::RefundNotFound)?;
        if refund.status != RefundStatus::Pending { return Err(OrderError::RefundNotPending); }
        refund.status = RefundStatus::Failed;
        refund.history.push(RefundStatusChange { status: RefundStatus::Failed, note: Some(reason.into()), at: Utc::now() });
        self.touch();
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), OrderError> {
        if self.status_history.is_empty() { Ok(()) } else { Err(OrderError::NotEditable) }
    }

    fn recalculate(&mut self) {
        for item in &mut self.items { item.total = item.unit_price.multiply(item.quantity); }
        self.subtotal = self.items.iter().fold(Money::zero(&self.currency), |acc, i| acc.add(&i.total).unwrap_or(acc));
        self.tax.amount = self.subtotal.scale(self.tax.rate);
        if self.discount.amount.amount() > self.subtotal.amount() {
            self.discount.amount = self.subtotal.clone();
        }
        self.total = self.subtotal.add(&self.tax.amount).unwrap_or(self.subtotal.clone());
        self.total = self.total.add(&self.shipping.cost).unwrap_or(self.total.clone());
        self.total = self.total.sub(&self.discount.amount).unwrap_or(self.total.clone());
        self.touch();
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("No items")]
    NoItems,
    #[error("Invalid quantity")]
    InvalidQuantity,
    #[error("Order can no longer be edited")]
    NotEditable,
    #[error("Currency does not match the order currency")]
    CurrencyMismatch,
    #[error("Invalid tax rate")]
    InvalidTaxRate,
    #[error("Invalid discount")]
    InvalidDiscount,
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("Order is already paid")]
    AlreadyPaid,
    #[error("Order has not been paid")]
    NotPaid,
    #[error("Order cannot be paid")]
    NotPayable,
    #[error("Only delivered orders can be returned")]
    ReturnNotAllowed,
    #[error("Product {0} is not part of this order")]
    ReturnItemNotInOrder(Uuid),
    #[error("Cannot return {requested} of product {product_id}; {returnable} returnable")]
    ReturnQuantityExceeded { product_id: Uuid, requested: u32, returnable: u32 },
    #[error("Return not found")]
    ReturnNotFound,
    #[error("Cannot move return from {from:?} to {to:?}")]
    InvalidReturnTransition { from: ReturnStatus, to: ReturnStatus },
    #[error("Refund not found")]
    RefundNotFound,
    #[error("Refund amount must be positive")]
    InvalidRefundAmount,
    #[error("Refund of {requested} exceeds the refundable {refundable}")]
    RefundExceedsTotal { requested: Decimal, refundable: Decimal },
    #[error("Refund is not pending")]
    RefundNotPending,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: u32, price: i64) -> LineItem {
        let unit = Money::usd(Decimal::new(price, 0));
        LineItem { id: Uuid::new_v4(), product_id: Uuid::new_v4(), variant_sku: None, name: "Widget".into(), sku: Sku::new("W001").unwrap(), quantity: qty, total: unit.multiply(qty), unit_price: unit }
    }

    fn placed(items: Vec<LineItem>) -> Order {
        let mut order = Order::create(None, "test@example.com", "USD");
        for item in items { order.add_item(item).unwrap(); }
        order.place().unwrap();
        order
    }

    fn assert_total_invariant(order: &Order) {
        let expected = order.subtotal().amount() + order.tax().amount.amount() + order.shipping().cost.amount() - order.discount().amount.amount();
        assert_eq!(order.total().amount(), expected);
    }

    #[test]
    fn test_order_workflow() {
        let mut order = placed(vec![line(2, 10)]);
        assert_eq!(order.status(), OrderStatus::Pending);
        order.mark_paid("pi_1").unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        order.update_status(OrderStatus::Processing, None, None).unwrap();
        order.set_tracking("UPS", "1Z999", None).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert!(order.timestamps().shipped_at.is_some());
        assert_eq!(order.status_history().len(), 4);
    }

    #[test]
    fn test_totals_follow_formula() {
        let mut order = Order::create(None, "a@b.io", "USD");
        order.add_item(line(3, 20)).unwrap();
        order.set_tax_rate(Decimal::new(8, 2)).unwrap();
        order.set_shipping("express", Money::usd(Decimal::new(15, 0))).unwrap();
        order.apply_discount(Some("SAVE10".into()), Money::usd(Decimal::new(10, 0))).unwrap();
        order.before_save();
        assert_eq!(order.subtotal().amount(), Decimal::new(60, 0));
        assert_eq!(order.tax().amount.amount(), Decimal::new(480, 2));
        assert_eq!(order.total().amount(), Decimal::new(6980, 2));
        assert_total_invariant(&order);
    }

    #[test]
    fn test_discount_cannot_exceed_subtotal() {
        let mut order = Order::create(None, "a@b.io", "USD");
        order.add_item(line(1, 5)).unwrap();
        assert_eq!(order.apply_discount(None, Money::usd(Decimal::new(6, 0))), Err(OrderError::InvalidDiscount));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut order = placed(vec![line(1, 10)]);
        assert!(matches!(order.update_status(OrderStatus::Delivered, None, None), Err(OrderError::InvalidTransition { from: "pending", to: "delivered" })));
        order.update_status(OrderStatus::Cancelled, None, None).unwrap();
        assert!(order.update_status(OrderStatus::Confirmed, None, None).is_err());
        assert!(order.timestamps().cancelled_at.is_some());
        assert_eq!(order.add_item(line(1, 1)), Err(OrderError::NotEditable));
    }

    #[test]
    fn test_returns_limited_to_ordered_quantity() {
        let item = line(3, 10);
        let product_id = item.product_id;
        let mut order = placed(vec![item]);
        let ret = ReturnItem { product_id, variant_sku: None, quantity: 2 };
        assert_eq!(order.request_return(vec![ret.clone()], "too big", None), Err(OrderError::ReturnNotAllowed));

        order.mark_paid("pi").unwrap();
        order.update_status(OrderStatus::Processing, None, None).unwrap();
        order.update_status(OrderStatus::Shipped, None, None).unwrap();
        order.update_status(OrderStatus::Delivered, None, None).unwrap();

        let first = order.request_return(vec![ret.clone()], "too big", None).unwrap();
        assert!(matches!(order.request_return(vec![ret.clone()], "again", None), Err(OrderError::ReturnQuantityExceeded { returnable: 1, .. })));
        order.update_return_status(first, ReturnStatus::Rejected, None, None).unwrap();
        let second = order.request_return(vec![ret], "again", None).unwrap();
        order.update_return_status(second, ReturnStatus::Approved, None, None).unwrap();
        assert!(order.update_return_status(second, ReturnStatus::Completed, None, None).is_err());
        let received = order.update_return_status(second, ReturnStatus::Received, None, None).unwrap();
        assert_eq!(received.history.len(), 3);
    }

    #[test]
    fn test_refunds_capped_and_mark_refunded() {
        let mut order = placed(vec![line(2, 10)]);
        assert_eq!(order.request_refund(Decimal::ONE, "x", None), Err(OrderError::NotPaid));
        order.mark_paid("pi").unwrap();
        let first = order.request_refund(Decimal::new(15, 0), "damaged", None).unwrap();
        assert!(matches!(order.request_refund(Decimal::new(6, 0), "more", None), Err(OrderError::RefundExceedsTotal { .. })));
        order.complete_refund(first, Some("re_1".into())).unwrap();
        assert_eq!(order.payment().status, PaymentStatus::PartiallyRefunded);

        let second = order.request_refund(Decimal::new(5, 0), "rest", None).unwrap();
        order.complete_refund(second, None).unwrap();
        assert_eq!(order.payment().status, PaymentStatus::Refunded);
        assert_eq!(order.status(), OrderStatus::Refunded);
        assert_total_invariant(&order);
    }

    #[test]
    fn test_failed_refund_frees_amount() {
        let mut order = placed(vec![line(1, 10)]);
        order.mark_paid("pi").unwrap();
        let r = order.request_refund(Decimal::new(10, 0), "x", None).unwrap();
        order.fail_refund(r, "card expired").unwrap();
        assert!(order.request_refund(Decimal::new(10, 0), "retry", None).is_ok());
    }

    #[test]
    fn test_stock_work_follows_status() {
        let mut shipped = placed(vec![line(1, 10)]);
        assert_eq!(shipped.claim_stock_work(), None);
        shipped.update_status(OrderStatus::Processing, None, None).unwrap();
        assert_eq!(shipped.claim_stock_work(), None);
        shipped.update_status(OrderStatus::Shipped, None, None).unwrap();
        assert_eq!(shipped.claim_stock_work(), Some(StockState::Committing));
        // Unfinished work is handed out again.
        assert_eq!(shipped.claim_stock_work(), Some(StockState::Committing));
        assert!(shipped.finish_stock_work(StockState::Committing));
        assert_eq!(shipped.stock_state(), StockState::Committed);
        assert_eq!(shipped.claim_stock_work(), None);

        let mut refunded = placed(vec![line(1, 10)]);
        refunded.update_status(OrderStatus::Confirmed, None, None).unwrap();
        refunded.update_status(OrderStatus::Refunded, None, None).unwrap();
        assert_eq!(refunded.claim_stock_work(), Some(StockState::Releasing));
        assert!(!refunded.finish_stock_work(StockState::Committing));
        assert!(refunded.finish_stock_work(StockState::Releasing));
        assert_eq!(refunded.stock_state(), StockState::Released);
    }

    #[test]
    fn test_cancel_after_commit_claim_restocks_afterwards() {
        let mut order = placed(vec![line(2, 10)]);
        order.mark_paid("pi").unwrap();
        assert_eq!(order.claim_stock_work(), Some(StockState::Committing));
        order.update_status(OrderStatus::Cancelled, None, None).unwrap();
        // The in-flight commit finishes first, then the units go back.
        assert_eq!(order.claim_stock_work(), Some(StockState::Committing));
        order.finish_stock_work(StockState::Committing);
        assert_eq!(order.claim_stock_work(), Some(StockState::Restocking));
        order.finish_stock_work(StockState::Restocking);
        assert_eq!(order.stock_state(), StockState::Released);
    }

    #[test]
    fn test_terminal_orders_cannot_be_paid() {
        let mut order = placed(vec![line(1, 10)]);
        order.update_status(OrderStatus::Cancelled, None, None).unwrap();
        assert_eq!(order.mark_paid("pi"), Err(OrderError::NotPayable));
        assert_eq!(order.claim_stock_work(), Some(StockState::Releasing));
    }
}
