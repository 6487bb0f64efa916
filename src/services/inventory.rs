//! Stock movements against product documents.
//!
//! Every change goes through [`Repository::update`], so the availability
//! check and the write happen against the same document version. Two
//! concurrent reservations can never both take the last unit.
//!
//! Stock an order holds is settled through [`InventoryService::settle_order`]:
//! the order claims the work in a conditional write, each product line is
//! moved at most once per order, and the claim is only settled after every
//! line has moved.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::aggregates::product::{StockLevel, StockMovement};
use crate::domain::aggregates::{EntityKind, MovementContext, MovementKind, Order, Product, ProductError, StockAdjustment, StockState};
use crate::domain::value_objects::Sku;
use crate::events::EventPublisher;
use crate::services::{AuditService, AuthUser};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustStock {
    pub variant_sku: Option<Sku>,
    #[serde(flatten)]
    pub adjustment: StockAdjustment,
    pub reason: Option<String>,
}

/// One line of the low-stock report.
#[derive(Debug, Clone, Serialize)]
pub struct LowStockItem {
    pub product_id: Uuid,
    pub name: String,
    pub sku: Sku,
    pub variant_sku: Option<Sku>,
    pub stock: StockLevel,
    pub available: u32,
    pub reorder_point: u32,
}

#[derive(Clone)]
pub struct InventoryService {
    products: Repository<Product>,
    audit: AuditService,
    events: EventPublisher,
}

impl InventoryService {
    pub fn new(products: Repository<Product>, audit: AuditService, events: EventPublisher) -> Self {
        Self { products, audit, events }
    }

    pub async fn adjust(&self, product_id: Uuid, req: AdjustStock, actor: &AuthUser) -> Result<(Product, StockMovement)> {
        let (product, movement) = self
            .apply(product_id, |p| {
                p.adjust_stock(req.variant_sku.as_ref(), req.adjustment, MovementContext::by(Some(actor.id), req.reason.clone()))
            })
            .await?;
        tracing::info!(%product_id, variant = ?req.variant_sku, adjustment = ?req.adjustment, "stock adjusted");
        self.audit
            .record(
                Some(actor.id),
                "inventory.adjusted",
                EntityKind::Product,
                Some(product_id),
                json!({ "variant_sku": req.variant_sku, "adjustment": req.adjustment, "reason": req.reason, "resulting_quantity": movement.resulting_quantity }),
            )
            .await;
        Ok((product, movement))
    }

    pub async fn reserve(&self, product_id: Uuid, variant: Option<&Sku>, qty: u32, order_id: Uuid) -> Result<Product> {
        let (product, _) = self.apply(product_id, |p| p.reserve_stock(variant, qty, MovementContext::order(order_id))).await?;
        Ok(product)
    }

    pub async fn release(&self, product_id: Uuid, variant: Option<&Sku>, qty: u32, order_id: Uuid) -> Result<Product> {
        let (product, _) = self.apply(product_id, |p| p.release_reserved_stock(variant, qty, MovementContext::order(order_id))).await?;
        Ok(product)
    }

    /// Applies the stock work the order's status and payment call for, then
    /// puts received returns back on the shelf. An error leaves the claim on
    /// the order, and the next call finishes it without moving any line twice.
    pub async fn settle_order(&self, orders: &Repository<Order>, order_id: Uuid, actor: Option<Uuid>) -> Result<Order> {
        // Reserved -> Committing -> Committed -> Restocking -> Released is the longest path.
        for _ in 0..4 {
            let (order, work) = orders.update(order_id, |o| Ok(o.claim_stock_work())).await?;
            let Some(work) = work else { break };
            let (kind, reason) = match work {
                StockState::Committing => (MovementKind::Sale, None),
                StockState::Releasing => (MovementKind::Release, None),
                _ => (MovementKind::Cancellation, Some("Order cancelled".to_string())),
            };
            let ctx = MovementContext { reason, actor, order_id: Some(order_id) };
            for (product_id, variant, qty) in order_lines(order.items().iter().map(|i| (i.product_id, &i.variant_sku, i.quantity))) {
                self.move_for_order(product_id, variant.as_ref(), qty, kind, &ctx).await?;
            }
            let (_, settled) = orders.update(order_id, |o| Ok(o.finish_stock_work(work))).await?;
            if settled {
                tracing::info!(%order_id, ?work, "order stock settled");
            }
        }

        let order = orders.require(order_id).await?;
        for request in order.returns_to_restock() {
            let ctx = MovementContext { reason: Some(format!("Return {}", request.id)), actor, order_id: Some(order_id) };
            for (product_id, variant, qty) in order_lines(request.items.iter().map(|i| (i.product_id, &i.variant_sku, i.quantity))) {
                self.move_for_order(product_id, variant.as_ref(), qty, MovementKind::Return, &ctx).await?;
            }
            orders.update(order_id, |o| { o.mark_return_restocked(request.id); Ok(()) }).await?;
            tracing::info!(%order_id, return_id = %request.id, "returned units restocked");
        }
        orders.require(order_id).await
    }

    async fn move_for_order(&self, product_id: Uuid, variant: Option<&Sku>, qty: u32, kind: MovementKind, ctx: &MovementContext) -> Result<()> {
        let (mut product, moved) = self
            .products
            .update(product_id, |p| {
                if p.has_order_movement(variant, kind, ctx) {
                    return Ok(false);
                }
                match kind {
                    MovementKind::Sale => p.commit_reserved_stock(variant, qty, ctx.clone())?,
                    MovementKind::Release => p.release_reserved_stock(variant, qty, ctx.clone())?,
                    _ => p.restock(variant, qty, kind, ctx.clone())?,
                };
                Ok(true)
            })
            .await?;
        if moved {
            self.events.publish(product.take_events()).await;
        }
        Ok(())
    }

    /// Products (or their variants) at or below their reorder point.
    pub async fn low_stock(&self, page: Page) -> Result<PaginatedResponse<LowStockItem>> {
        let filter = Filter::new().eq("inventory", json!({ "low_stock": true }));
        let products = self.products.find(&filter, page).await?;
        let data = products.data.iter().flat_map(low_stock_lines).collect();
        Ok(PaginatedResponse { data, total: products.total, page: products.page })
    }

    pub async fn history(&self, product_id: Uuid, variant: Option<&Sku>) -> Result<Vec<StockMovement>> {
        let product = self.products.require(product_id).await?;
        Ok(product
            .stock_history()
            .iter()
            .rev()
            .filter(|m| variant.is_none() || m.variant_sku.as_ref() == variant)
            .cloned()
            .collect())
    }

    async fn apply<F>(&self, product_id: Uuid, mut op: F) -> Result<(Product, StockMovement)>
    where
        F: FnMut(&mut Product) -> std::result::Result<StockMovement, ProductError>,
    {
        let (mut product, movement) = self.products.update(product_id, |p| op(p).map_err(Into::into)).await?;
        self.events.publish(product.take_events()).await;
        Ok((product, movement))
    }
}

/// Quantities summed per product line, so one movement covers every order line for it.
fn order_lines<'a>(lines: impl Iterator<Item = (Uuid, &'a Option<Sku>, u32)>) -> Vec<(Uuid, Option<Sku>, u32)> {
    let mut merged: Vec<(Uuid, Option<Sku>, u32)> = Vec::new();
    for (product_id, variant, qty) in lines {
        match merged.iter_mut().find(|(id, v, _)| *id == product_id && v == variant) {
            Some(line) => line.2 += qty,
            None => merged.push((product_id, variant.clone(), qty)),
        }
    }
    merged
}

fn low_stock_lines(product: &Product) -> Vec<LowStockItem> {
    let point = product.inventory().reorder_point;
    let line = |variant_sku: Option<Sku>, stock: StockLevel| LowStockItem {
        product_id: product.id(),
        name: product.name().to_string(),
        sku: product.sku().clone(),
        variant_sku,
        available: stock.available(),
        stock,
        reorder_point: point,
    };
    if product.has_variants() {
        product
            .variants()
            .iter()
            .filter(|v| v.stock.available() <= point)
            .map(|v| line(Some(v.sku.clone()), v.stock))
            .collect()
    } else {
        vec![line(None, product.inventory().level)]
    }
}
