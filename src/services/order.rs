//! Order placement and lifecycle.
//!
//! Stock is reserved while an order is placed and committed once payment
//! succeeds or the goods ship. Cancelling gives back exactly what the order
//! holds: reserved units are released, committed units are put back on the
//! shelf. Every status change ends in [`InventoryService::settle_order`].

use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::order::Refund;
use crate::domain::aggregates::{
    Address, EntityKind, LineItem, Order, OrderStatus, PaymentStatus, Product, ProductError, ReturnItem, ReturnStatus,
};
use crate::domain::value_objects::{Money, Sku};
use crate::events::EventPublisher;
use crate::services::{AuditService, AuthUser, ContentService, InventoryService, SettingsService};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::stripe::PaymentGateway;
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub variant_sku: Option<Sku>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrder {
    #[validate(length(min = 1, max = 100))]
    pub items: Vec<OrderLine>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate]
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<String>,
    pub promo_code: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub user_id: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub by_status: BTreeMap<&'static str, u64>,
    pub paid_orders: u64,
    pub revenue: Decimal,
    pub refunded: Decimal,
    pub average_order_value: Decimal,
}

#[derive(Clone)]
pub struct OrderService {
    orders: Repository<Order>,
    products: Repository<Product>,
    inventory: InventoryService,
    settings: SettingsService,
    content: ContentService,
    audit: AuditService,
    events: EventPublisher,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Repository<Order>,
        products: Repository<Product>,
        inventory: InventoryService,
        settings: SettingsService,
        content: ContentService,
        audit: AuditService,
        events: EventPublisher,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self { orders, products, inventory, settings, content, audit, events, gateway }
    }

    /// Prices the lines from the catalog, reserves their stock and stores the
    /// order. A failed reservation undoes the ones made before it.
    pub async fn create(&self, customer: &AuthUser, req: CreateOrder) -> Result<Order> {
        req.validate()?;
        if let Some(billing) = &req.billing_address {
            billing.validate()?;
        }
        let settings = self.settings.get().await?;
        let email = req.email.clone().unwrap_or_else(|| customer.email.clone());
        let mut order = Order::create(Some(customer.id), email, &settings.currency);

        for line in &req.items {
            let product = self.products.get(line.product_id).await?.ok_or(EcommerceError::NotFound("Product"))?;
            if !product.is_active() {
                return Err(ProductError::NotPurchasable.into());
            }
            let variant = line.variant_sku.as_ref();
            let unit_price = product.unit_price(variant)?;
            let name = match variant {
                Some(sku) => format!("{} ({})", product.name(), product.variant(sku)?.title()),
                None => product.name().to_string(),
            };
            let total = unit_price.multiply(line.quantity);
            order.add_item(LineItem {
                id: Uuid::new_v4(),
                product_id: product.id(),
                variant_sku: line.variant_sku.clone(),
                name,
                sku: line.variant_sku.clone().unwrap_or_else(|| product.sku().clone()),
                quantity: line.quantity,
                unit_price,
                total,
            })?;
        }

        order.set_addresses(req.shipping_address.clone(), req.billing_address.clone());
        order.set_notes(req.notes.clone());
        order.set_tax_rate(settings.tax_rate)?;
        let shipping = settings.shipping_for(order.subtotal());
        order.set_shipping(req.shipping_method.clone().unwrap_or_else(|| "standard".into()), shipping)?;
        if let Some(code) = req.promo_code.as_deref().filter(|c| !c.trim().is_empty()) {
            let promotion = self
                .content
                .find_promotion(code)
                .await?
                .ok_or_else(|| EcommerceError::Validation(format!("Promotion code {} is not valid", code.trim())))?;
            let discount = promotion
                .promotion_discount(order.subtotal().amount(), Utc::now())
                .ok_or_else(|| EcommerceError::Validation("Order does not qualify for this promotion".into()))?;
            let discount = discount.min(order.subtotal().amount());
            order.apply_discount(promotion.promotion_code().map(String::from), Money::new(discount, order.currency()))?;
        }
        order.place()?;

        let mut reserved: Vec<&LineItem> = Vec::with_capacity(order.items().len());
        for item in order.items() {
            match self.inventory.reserve(item.product_id, item.variant_sku.as_ref(), item.quantity, order.id()).await {
                Ok(_) => reserved.push(item),
                Err(e) => {
                    tracing::warn!(order_id = %order.id(), product_id = %item.product_id, error = %e, "reservation failed, rolling back");
                    self.release_lines(&reserved, order.id()).await;
                    return Err(e);
                }
            }
        }

        let mut order = match self.orders.insert(order.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                let items: Vec<&LineItem> = order.items().iter().collect();
                self.release_lines(&items, order.id()).await;
                return Err(e);
            }
        };

        tracing::info!(order_id = %order.id(), order_number = %order.order_number(), total = %order.total(), "order placed");
        self.events.publish(order.take_events()).await;
        self.audit
            .record(
                Some(customer.id),
                "order.created",
                EntityKind::Order,
                Some(order.id()),
                json!({ "order_number": order.order_number(), "total": order.total().amount(), "items": order.items().len() }),
            )
            .await;
        Ok(order)
    }

    pub async fn get(&self, id: Uuid) -> Result<Order> { self.orders.require(id).await }

    /// Staff see any order; customers only their own, and others' orders do not exist for them.
    pub async fn get_for(&self, id: Uuid, caller: &AuthUser) -> Result<Order> {
        let order = self.orders.require(id).await?;
        if caller.is_staff() || order.user_id() == Some(caller.id) {
            Ok(order)
        } else {
            Err(EcommerceError::NotFound("Order"))
        }
    }

    pub async fn list(&self, query: OrderQuery, page: Page) -> Result<PaginatedResponse<Order>> {
        let filter = Filter::new()
            .eq_opt("status", query.status)
            .eq_opt("user_id", query.user_id)
            .eq_opt("payment", query.payment_status.map(|s| json!({ "status": s })))
            .search(&["order_number", "email"], query.search.as_deref());
        self.orders.find(&filter, page).await
    }

    pub async fn list_for_customer(&self, customer: &AuthUser, status: Option<OrderStatus>, page: Page) -> Result<PaginatedResponse<Order>> {
        self.list(OrderQuery { status, user_id: Some(customer.id), ..OrderQuery::default() }, page).await
    }

    pub async fn update_status(&self, id: Uuid, next: OrderStatus, note: Option<String>, actor: &AuthUser) -> Result<Order> {
        if next == OrderStatus::Cancelled {
            return self.cancel(id, note, actor).await;
        }
        let (mut order, previous) = self
            .orders
            .update(id, |o| {
                let previous = o.status();
                o.update_status(next, note.clone(), Some(actor.id))?;
                Ok(previous)
            })
            .await?;
        self.events.publish(order.take_events()).await;
        self.audit
            .record(Some(actor.id), "order.status_changed", EntityKind::Order, Some(id), json!({ "from": previous, "to": next, "note": note }))
            .await;
        self.inventory.settle_order(&self.orders, id, Some(actor.id)).await
    }

    /// Cancels the order and returns its stock. Customers may only cancel
    /// their own orders while they are still pending.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>, actor: &AuthUser) -> Result<Order> {
        self.get_for(id, actor).await?;
        let (mut order, previous) = self
            .orders
            .update(id, |o| {
                let previous = o.status();
                if !actor.is_staff() && previous != OrderStatus::Pending {
                    return Err(EcommerceError::Validation("Only pending orders can be cancelled".into()));
                }
                o.update_status(OrderStatus::Cancelled, reason.clone(), Some(actor.id))?;
                Ok(previous)
            })
            .await?;
        if order.is_paid() {
            tracing::warn!(order_id = %id, "paid order cancelled; refund must be issued separately");
        }
        self.events.publish(order.take_events()).await;
        self.audit
            .record(Some(actor.id), "order.cancelled", EntityKind::Order, Some(id), json!({ "reason": reason, "previous_status": previous }))
            .await;
        self.inventory.settle_order(&self.orders, id, Some(actor.id)).await
    }

    pub async fn set_tracking(&self, id: Uuid, carrier: String, tracking_number: String, actor: &AuthUser) -> Result<Order> {
        if carrier.trim().is_empty() || tracking_number.trim().is_empty() {
            return Err(EcommerceError::Validation("carrier and tracking_number are required".into()));
        }
        let (mut order, _) = self
            .orders
            .update(id, |o| o.set_tracking(carrier.trim(), tracking_number.trim(), Some(actor.id)).map_err(Into::into))
            .await?;
        self.events.publish(order.take_events()).await;
        self.audit
            .record(Some(actor.id), "order.tracking_set", EntityKind::Order, Some(id), json!({ "carrier": carrier, "tracking_number": tracking_number }))
            .await;
        self.inventory.settle_order(&self.orders, id, Some(actor.id)).await
    }

    // ── Returns ──

    pub async fn request_return(&self, id: Uuid, items: Vec<ReturnItem>, reason: String, caller: &AuthUser) -> Result<Order> {
        self.get_for(id, caller).await?;
        if reason.trim().is_empty() {
            return Err(EcommerceError::Validation("A return reason is required".into()));
        }
        let (mut order, return_id) = self
            .orders
            .update(id, |o| o.request_return(items.clone(), reason.trim(), Some(caller.id)).map_err(Into::into))
            .await?;
        self.events.publish(order.take_events()).await;
        self.audit.record(Some(caller.id), "order.return_requested", EntityKind::Order, Some(id), json!({ "return_id": return_id })).await;
        Ok(order)
    }

    /// Moves a return along; receiving it puts the returned units back in stock.
    pub async fn update_return(&self, id: Uuid, return_id: Uuid, next: ReturnStatus, note: Option<String>, actor: &AuthUser) -> Result<Order> {
        self.orders
            .update(id, |o| o.update_return_status(return_id, next, note.clone(), Some(actor.id)).map_err(Into::into))
            .await?;
        self.audit
            .record(Some(actor.id), "order.return_updated", EntityKind::Order, Some(id), json!({ "return_id": return_id, "status": next, "note": note }))
            .await;
        self.inventory.settle_order(&self.orders, id, Some(actor.id)).await
    }

    // ── Refunds ──

    /// Records a refund, sends it to the payment processor and settles it.
    /// The pending entry counts against the refundable amount while the
    /// processor call is in flight.
    pub async fn refund(&self, id: Uuid, amount: Decimal, reason: String, actor: &AuthUser) -> Result<Refund> {
        let amount = amount.round_dp(2);
        let current = self.orders.require(id).await?;
        let minor = Money::new(amount, current.currency()).minor_units()?;
        let (order, refund_id) = self
            .orders
            .update(id, |o| o.request_refund(amount, reason.clone(), Some(actor.id)).map_err(Into::into))
            .await?;

        let external_id = match order.payment().intent_id.as_deref() {
            Some(intent_id) => {
                let gateway = match self.gateway.as_ref() {
                    Some(gateway) => gateway,
                    None => {
                        let message = "Payments are not configured";
                        self.fail_refund(id, refund_id, message).await;
                        return Err(EcommerceError::Payment(message.into()));
                    }
                };
                match gateway.refund(intent_id, minor).await {
                    Ok(external) => Some(external),
                    Err(e) => {
                        self.fail_refund(id, refund_id, &e.to_string()).await;
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let (mut order, refund) = self
            .orders
            .update(id, |o| o.complete_refund(refund_id, external_id.clone()).map_err(Into::into))
            .await?;
        tracing::info!(order_id = %id, %refund_id, amount = %amount, "refund processed");
        self.events.publish(order.take_events()).await;
        self.audit
            .record(
                Some(actor.id),
                "order.refunded",
                EntityKind::Order,
                Some(id),
                json!({ "refund_id": refund_id, "amount": amount, "external_id": external_id, "reason": reason }),
            )
            .await;
        Ok(refund)
    }

    async fn fail_refund(&self, order_id: Uuid, refund_id: Uuid, reason: &str) {
        if let Err(e) = self.orders.update(order_id, |o| o.fail_refund(refund_id, reason).map_err(Into::into)).await {
            tracing::error!(%order_id, %refund_id, error = %e, "failed to mark refund as failed");
        }
    }

    // ── Reporting ──

    pub async fn stats(&self) -> Result<OrderStats> {
        let orders = self.orders.find_all(&Filter::new()).await?;
        let mut by_status = BTreeMap::new();
        let mut revenue = Decimal::ZERO;
        let mut refunded = Decimal::ZERO;
        let mut paid_orders = 0u64;
        for order in &orders {
            *by_status.entry(order.status().as_str()).or_insert(0u64) += 1;
            if order.is_paid() {
                paid_orders += 1;
                revenue += order.total().amount();
                refunded += order.refunded_amount().amount();
            }
        }
        let average_order_value = if paid_orders == 0 { Decimal::ZERO } else { (revenue / Decimal::from(paid_orders)).round_dp(2) };
        Ok(OrderStats { total_orders: orders.len() as u64, by_status, paid_orders, revenue, refunded, average_order_value })
    }

    async fn release_lines(&self, items: &[&LineItem], order_id: Uuid) {
        for item in items {
            if let Err(e) = self.inventory.release(item.product_id, item.variant_sku.as_ref(), item.quantity, order_id).await {
                tracing::error!(%order_id, product_id = %item.product_id, error = %e, "failed to release reservation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{ContentBody, MovementKind, StockState};
    use crate::services::content::CreateContent;
    use crate::store::Repository;
    use crate::test_utils::{address, TestApp};

    fn order_for(lines: &[(Uuid, u32)]) -> CreateOrder {
        CreateOrder {
            items: lines.iter().map(|(id, qty)| OrderLine { product_id: *id, variant_sku: None, quantity: *qty }).collect(),
            email: None,
            shipping_address: address(),
            billing_address: None,
            shipping_method: None,
            promo_code: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_reserves_stock_and_prices_order() {
        let app = TestApp::new().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("MUG-1", 10, 12).await;

        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 3)])).await.unwrap();
        assert_eq!(order.total().amount(), Decimal::new(36, 0));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.status_history().len(), 1);
        assert_eq!(order.email(), "buyer@example.com");

        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(stored.inventory().level.reserved, 3);
        assert_eq!(stored.inventory().level.available(), 7);
    }

    #[tokio::test]
    async fn test_failed_reservation_rolls_back_earlier_lines() {
        let app = TestApp::new().await;
        let customer = app.customer("buyer@example.com").await;
        let plenty = app.product("PLENTY", 10, 5).await;
        let scarce = app.product("SCARCE", 1, 5).await;

        let err = app.services.orders.create(&customer, order_for(&[(plenty.id(), 4), (scarce.id(), 2)])).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Product(ProductError::InsufficientInventory { requested: 2, available: 1, .. })));

        let plenty = app.services.catalog.get_product(plenty.id()).await.unwrap();
        assert_eq!(plenty.inventory().level.reserved, 0);
        assert_eq!(plenty.inventory().level.available(), 10);
        let orders = app.services.orders.list(OrderQuery::default(), Page::default()).await.unwrap();
        assert_eq!(orders.total, 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_order_restores_stock_exactly() {
        let app = TestApp::new().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("CANCEL-1", 8, 10).await;

        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 5)])).await.unwrap();
        let cancelled = app.services.orders.cancel(order.id(), Some("changed my mind".into()), &customer).await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.stock_state(), StockState::Released);

        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(stored.inventory().level.quantity, 8);
        assert_eq!(stored.inventory().level.available(), 8);

        let again = app.services.orders.cancel(order.id(), None, &app.admin().await).await;
        assert!(matches!(again, Err(EcommerceError::Order(_))));
        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(stored.inventory().level.available(), 8);
    }

    #[tokio::test]
    async fn test_cancel_committed_order_puts_units_back() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("PAID-1", 6, 10).await;

        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 2)])).await.unwrap();
        app.mark_paid(order.id()).await;
        let sold = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(sold.inventory().level.quantity, 4);
        assert_eq!(sold.inventory().level.reserved, 0);

        app.services.orders.cancel(order.id(), None, &admin).await.unwrap();
        let restored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(restored.inventory().level.quantity, 6);
        assert_eq!(restored.stock_history().last().map(|m| m.kind), Some(MovementKind::Cancellation));
    }

    #[tokio::test]
    async fn test_customer_cannot_touch_other_orders() {
        let app = TestApp::new().await;
        let owner = app.customer("owner@example.com").await;
        let other = app.customer("other@example.com").await;
        let product = app.product("OWN-1", 5, 10).await;
        let order = app.services.orders.create(&owner, order_for(&[(product.id(), 1)])).await.unwrap();

        assert!(matches!(app.services.orders.get_for(order.id(), &other).await, Err(EcommerceError::NotFound(_))));
        assert!(app.services.orders.cancel(order.id(), None, &other).await.is_err());
        assert_eq!(app.services.orders.list_for_customer(&other, None, Page::default()).await.unwrap().total, 0);
        assert_eq!(app.services.orders.list_for_customer(&owner, None, Page::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_invalid_status_transition() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("FLOW-1", 5, 10).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 1)])).await.unwrap();

        let err = app.services.orders.update_status(order.id(), OrderStatus::Delivered, None, &admin).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Order(_)));
        let processing = app.services.orders.update_status(order.id(), OrderStatus::Processing, None, &admin).await.unwrap();
        assert_eq!(processing.status_history().len(), 2);
        let shipped = app.services.orders.set_tracking(order.id(), "UPS".into(), "1Z999".into(), &admin).await.unwrap();
        assert_eq!(shipped.status(), OrderStatus::Shipped);
        assert!(shipped.timestamps().shipped_at.is_some());
    }

    #[tokio::test]
    async fn test_shipping_an_unpaid_order_commits_its_reservation() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("SHIP-1", 10, 10).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 2)])).await.unwrap();

        let orders = &app.services.orders;
        orders.update_status(order.id(), OrderStatus::Processing, None, &admin).await.unwrap();
        let shipped = orders.update_status(order.id(), OrderStatus::Shipped, None, &admin).await.unwrap();
        assert_eq!(shipped.stock_state(), StockState::Committed);
        let delivered = orders.update_status(order.id(), OrderStatus::Delivered, None, &admin).await.unwrap();
        assert_eq!(delivered.stock_state(), StockState::Committed);

        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(stored.inventory().level.quantity, 8);
        assert_eq!(stored.inventory().level.reserved, 0);
        let sales = stored.stock_history().iter().filter(|m| m.kind == MovementKind::Sale).count();
        assert_eq!(sales, 1);
    }

    #[tokio::test]
    async fn test_tracking_an_unpaid_order_commits_its_reservation() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("SHIP-2", 10, 10).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 3)])).await.unwrap();

        app.services.orders.update_status(order.id(), OrderStatus::Processing, None, &admin).await.unwrap();
        let shipped = app.services.orders.set_tracking(order.id(), "DHL".into(), "JD01".into(), &admin).await.unwrap();
        assert_eq!(shipped.status(), OrderStatus::Shipped);
        assert_eq!(shipped.stock_state(), StockState::Committed);
        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!((stored.inventory().level.quantity, stored.inventory().level.reserved), (7, 0));
    }

    #[tokio::test]
    async fn test_refunding_an_unpaid_order_releases_its_reservation() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("REL-1", 10, 10).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 3)])).await.unwrap();

        app.services.orders.update_status(order.id(), OrderStatus::Confirmed, None, &admin).await.unwrap();
        let refunded = app.services.orders.update_status(order.id(), OrderStatus::Refunded, None, &admin).await.unwrap();
        assert_eq!(refunded.stock_state(), StockState::Released);
        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!((stored.inventory().level.quantity, stored.inventory().level.reserved), (10, 0));
    }

    #[tokio::test]
    async fn test_interrupted_settlement_is_finished_exactly_once() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let kept = app.product("KEPT-1", 10, 10).await;
        let lost = app.product("LOST-1", 10, 10).await;
        let order = app.services.orders.create(&customer, order_for(&[(kept.id(), 2), (lost.id(), 1)])).await.unwrap();

        let products: Repository<Product> = Repository::new(app.store.clone());
        let snapshot = products.require(lost.id()).await.unwrap();
        products.delete(lost.id()).await.unwrap();
        app.services.orders.update_status(order.id(), OrderStatus::Processing, None, &admin).await.unwrap();
        let err = app.services.orders.update_status(order.id(), OrderStatus::Shipped, None, &admin).await.unwrap_err();
        assert!(matches!(err, EcommerceError::NotFound(_)));
        let stuck = app.services.orders.get(order.id()).await.unwrap();
        assert_eq!(stuck.stock_state(), StockState::Committing);

        products.insert(snapshot).await.unwrap();
        let delivered = app.services.orders.update_status(order.id(), OrderStatus::Delivered, None, &admin).await.unwrap();
        assert_eq!(delivered.stock_state(), StockState::Committed);
        let kept = app.services.catalog.get_product(kept.id()).await.unwrap();
        assert_eq!((kept.inventory().level.quantity, kept.inventory().level.reserved), (8, 0));
        let lost = app.services.catalog.get_product(lost.id()).await.unwrap();
        assert_eq!((lost.inventory().level.quantity, lost.inventory().level.reserved), (9, 0));
    }

    #[tokio::test]
    async fn test_duplicate_lines_move_stock_together() {
        let app = TestApp::new().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("TWICE-1", 10, 10).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 2), (product.id(), 3)])).await.unwrap();
        app.services.orders.cancel(order.id(), None, &customer).await.unwrap();
        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!((stored.inventory().level.quantity, stored.inventory().level.reserved), (10, 0));
    }

    #[tokio::test]
    async fn test_promotion_and_settings_pricing() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        app.services
            .settings
            .update(
                crate::domain::aggregates::SettingsUpdate {
                    tax_rate: Some(Decimal::new(10, 2)),
                    flat_shipping: Some(Decimal::new(5, 0)),
                    ..Default::default()
                },
                &admin,
            )
            .await
            .unwrap();
        app.services
            .content
            .create(
                CreateContent {
                    title: "Ten off".into(),
                    slug: None,
                    body: ContentBody::Promotion { code: "TEN".into(), discount_percent: Decimal::new(10, 0), minimum_subtotal: None },
                    starts_at: None,
                    ends_at: None,
                    sort_order: 0,
                    publish: true,
                },
                &admin,
            )
            .await
            .unwrap();
        let product = app.product("PROMO-1", 5, 50).await;

        let mut req = order_for(&[(product.id(), 2)]);
        req.promo_code = Some("ten".into());
        let order = app.services.orders.create(&customer, req).await.unwrap();
        // 100 subtotal + 10 tax + 5 shipping - 10 discount
        assert_eq!(order.total().amount(), Decimal::new(105, 0));
        assert_eq!(order.discount().code.as_deref(), Some("TEN"));

        let mut bad = order_for(&[(product.id(), 1)]);
        bad.promo_code = Some("NOPE".into());
        assert!(matches!(app.services.orders.create(&customer, bad).await, Err(EcommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_return_received_restocks() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("RET-1", 5, 20).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 2)])).await.unwrap();
        app.mark_paid(order.id()).await;
        let orders = &app.services.orders;
        orders.update_status(order.id(), OrderStatus::Processing, None, &admin).await.unwrap();
        orders.update_status(order.id(), OrderStatus::Shipped, None, &admin).await.unwrap();
        orders.update_status(order.id(), OrderStatus::Delivered, None, &admin).await.unwrap();

        let item = ReturnItem { product_id: product.id(), variant_sku: None, quantity: 1 };
        let with_return = orders.request_return(order.id(), vec![item], "Too small".into(), &customer).await.unwrap();
        let return_id = with_return.returns()[0].id;
        orders.update_return(order.id(), return_id, ReturnStatus::Approved, None, &admin).await.unwrap();
        orders.update_return(order.id(), return_id, ReturnStatus::Received, None, &admin).await.unwrap();

        let stored = app.services.catalog.get_product(product.id()).await.unwrap();
        assert_eq!(stored.inventory().level.quantity, 4);
        assert_eq!(stored.stock_history().last().map(|m| m.kind), Some(MovementKind::Return));
    }

    #[tokio::test]
    async fn test_refund_through_gateway() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("REF-1", 5, 40).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 1)])).await.unwrap();
        app.mark_paid(order.id()).await;

        let partial = app.services.orders.refund(order.id(), Decimal::new(15, 0), "scratch".into(), &admin).await.unwrap();
        assert!(partial.external_id.is_some());
        let order_now = app.services.orders.get(order.id()).await.unwrap();
        assert_eq!(order_now.payment().status, PaymentStatus::PartiallyRefunded);

        let too_much = app.services.orders.refund(order.id(), Decimal::new(30, 0), "again".into(), &admin).await;
        assert!(matches!(too_much, Err(EcommerceError::Order(_))));

        app.services.orders.refund(order.id(), Decimal::new(25, 0), "rest".into(), &admin).await.unwrap();
        let refunded = app.services.orders.get(order.id()).await.unwrap();
        assert_eq!(refunded.payment().status, PaymentStatus::Refunded);
        assert_eq!(refunded.status(), OrderStatus::Refunded);
        assert_eq!(app.gateway.refunds().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_gateway_refund_is_recorded() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("REF-2", 5, 40).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 1)])).await.unwrap();
        app.mark_paid(order.id()).await;

        app.gateway.fail_refunds(true);
        let err = app.services.orders.refund(order.id(), Decimal::new(10, 0), "broken".into(), &admin).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Payment(_)));
        let stored = app.services.orders.get(order.id()).await.unwrap();
        assert_eq!(stored.refunds()[0].status, crate::domain::aggregates::order::RefundStatus::Failed);
        assert_eq!(stored.payment().status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_unrepresentable_refund_leaves_nothing_pending() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("REF-3", 5, 40).await;
        let order = app.services.orders.create(&customer, order_for(&[(product.id(), 1)])).await.unwrap();
        app.mark_paid(order.id()).await;

        let err = app.services.orders.refund(order.id(), Decimal::MAX, "too much".into(), &admin).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Money(_)));
        let stored = app.services.orders.get(order.id()).await.unwrap();
        assert!(stored.refunds().is_empty());
        assert!(app.gateway.refunds().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let app = TestApp::new().await;
        let customer = app.customer("buyer@example.com").await;
        let product = app.product("STAT-1", 10, 10).await;
        let paid = app.services.orders.create(&customer, order_for(&[(product.id(), 2)])).await.unwrap();
        app.services.orders.create(&customer, order_for(&[(product.id(), 1)])).await.unwrap();
        app.mark_paid(paid.id()).await;

        let stats = app.services.orders.stats().await.unwrap();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.paid_orders, 1);
        assert_eq!(stats.revenue, Decimal::new(20, 0));
        assert_eq!(stats.by_status.get("confirmed"), Some(&1));
        assert_eq!(stats.by_status.get("pending"), Some(&1));
    }
}
