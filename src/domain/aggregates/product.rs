//! Product Aggregate
//!
//! Stock lives either on the product's own [`Inventory`] (no variants) or on
//! each [`Variant`]. When variants exist they are authoritative: every stock
//! operation must name a variant sku and the product-level inventory is a
//! roll-up recomputed on save.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{slugify, Money, Sku};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::store::{Collection, Document};

/// Most recent movements kept on the document.
pub const STOCK_HISTORY_LIMIT: usize = 500;
pub const DEFAULT_REORDER_POINT: u32 = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    sku: Sku,
    name: String,
    slug: String,
    description: String,
    price: Money,
    sale_price: Option<Money>,
    cost: Option<Money>,
    category_id: Option<Uuid>,
    tags: Vec<String>,
    images: Vec<ProductImage>,
    status: ProductStatus,
    featured: bool,
    variants: Vec<Variant>,
    inventory: Inventory,
    stock_history: Vec<StockMovement>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel { pub quantity: u32, pub reserved: u32 }

impl StockLevel {
    pub fn new(quantity: u32) -> Self { Self { quantity, reserved: 0 } }
    pub fn available(&self) -> u32 { self.quantity.saturating_sub(self.reserved) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub sku: Sku,
    pub size: Option<String>,
    pub color: Option<String>,
    pub price: Option<Money>,
    pub stock: StockLevel,
}

impl Variant {
    pub fn new(sku: Sku, size: Option<String>, color: Option<String>, price: Option<Money>, quantity: u32) -> Self {
        Self { id: Uuid::new_v4(), sku, size, color, price, stock: StockLevel::new(quantity) }
    }

    pub fn title(&self) -> String {
        match (&self.size, &self.color) {
            (Some(s), Some(c)) => format!("{s} / {c}"),
            (Some(v), None) | (None, Some(v)) => v.clone(),
            (None, None) => self.sku.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(flatten)]
    pub level: StockLevel,
    pub reorder_point: u32,
    pub low_stock: bool,
}

impl Default for Inventory {
    fn default() -> Self { Self { level: StockLevel::default(), reorder_point: DEFAULT_REORDER_POINT, low_stock: true } }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct ProductImage { pub url: String, pub alt: Option<String>, pub position: u32 }
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum ProductStatus { #[default] Draft, Active, Archived }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind { Restock, Adjustment, Reservation, Release, Sale, Return, Cancellation }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "quantity", rename_all = "snake_case")]
pub enum StockAdjustment { Add(u32), Subtract(u32), Set(u32) }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub kind: MovementKind,
    pub variant_sku: Option<Sku>,
    pub quantity_delta: i64,
    pub reserved_delta: i64,
    pub resulting_quantity: u32,
    pub resulting_reserved: u32,
    pub reason: Option<String>,
    pub actor: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Who/why context attached to a stock movement.
#[derive(Clone, Debug, Default)]
pub struct MovementContext { pub reason: Option<String>, pub actor: Option<Uuid>, pub order_id: Option<Uuid> }

impl MovementContext {
    pub fn order(order_id: Uuid) -> Self { Self { order_id: Some(order_id), ..Self::default() } }
    pub fn by(actor: Option<Uuid>, reason: Option<String>) -> Self { Self { actor, reason, order_id: None } }
}

/// Partial update; absent fields are left untouched. `sale_price: null` clears the sale.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub sale_price: Option<Option<Decimal>>,
    pub cost: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<Uuid>>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<ProductImage>>,
    pub featured: Option<bool>,
    pub reorder_point: Option<u32>,
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

impl Document for Product {
    const COLLECTION: Collection = Collection::Products;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) {
        self.roll_up();
        self.refresh_low_stock();
    }
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Money) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let name = name.into();
        let mut product = Self {
            id, sku: sku.clone(), slug: slugify(&name), name, description: String::new(),
            price, sale_price: None, cost: None, category_id: None, tags: vec![], images: vec![],
            status: ProductStatus::Draft, featured: false, variants: vec![], inventory: Inventory::default(),
            stock_history: vec![], created_at: now, updated_at: now, events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id, sku }));
        product
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn slug(&self) -> &str { &self.slug }
    pub fn description(&self) -> &str { &self.description }
    pub fn price(&self) -> &Money { &self.price }
    pub fn sale_price(&self) -> Option<&Money> { self.sale_price.as_ref() }
    pub fn category_id(&self) -> Option<Uuid> { self.category_id }
    pub fn status(&self) -> ProductStatus { self.status }
    pub fn variants(&self) -> &[Variant] { &self.variants }
    pub fn inventory(&self) -> &Inventory { &self.inventory }
    pub fn stock_history(&self) -> &[StockMovement] { &self.stock_history }
    pub fn images(&self) -> &[ProductImage] { &self.images }
    pub fn has_variants(&self) -> bool { !self.variants.is_empty() }
    pub fn is_active(&self) -> bool { self.status == ProductStatus::Active }
    pub fn is_in_stock(&self) -> bool { self.total_available() > 0 }

    pub fn with_description(mut self, description: impl Into<String>) -> Self { self.description = description.into(); self }
    pub fn with_category(mut self, category_id: Option<Uuid>) -> Self { self.category_id = category_id; self }
    pub fn with_reorder_point(mut self, reorder_point: u32) -> Self { self.inventory.reorder_point = reorder_point; self }

    /// Sale price when it undercuts the list price.
    pub fn effective_price(&self) -> &Money {
        match &self.sale_price {
            Some(sale) if sale.amount() < self.price.amount() => sale,
            _ => &self.price,
        }
    }

    pub fn discount_percentage(&self) -> Option<Decimal> {
        let effective = self.effective_price().amount();
        let list = self.price.amount();
        (effective < list && !list.is_zero()).then(|| ((list - effective) / list * Decimal::ONE_HUNDRED).round_dp(0))
    }

    /// Price charged for one unit of the product or of one of its variants.
    pub fn unit_price(&self, variant: Option<&Sku>) -> Result<Money, ProductError> {
        match variant {
            Some(sku) => {
                let v = self.variant(sku)?;
                Ok(v.price.clone().unwrap_or_else(|| self.effective_price().clone()))
            }
            None if self.has_variants() => Err(ProductError::VariantRequired),
            None => Ok(self.effective_price().clone()),
        }
    }

    pub fn variant(&self, sku: &Sku) -> Result<&Variant, ProductError> {
        self.variants.iter().find(|v| &v.sku == sku).ok_or_else(|| ProductError::VariantNotFound(sku.to_string()))
    }

    pub fn available_stock(&self, variant: Option<&Sku>) -> Result<u32, ProductError> {
        match variant {
            Some(sku) => Ok(self.variant(sku)?.stock.available()),
            None if self.has_variants() => Err(ProductError::VariantRequired),
            None => Ok(self.inventory.level.available()),
        }
    }

    pub fn total_available(&self) -> u32 {
        if self.has_variants() {
            self.variants.iter().map(|v| v.stock.available()).sum()
        } else {
            self.inventory.level.available()
        }
    }

    pub fn publish(&mut self) -> Result<(), ProductError> {
        if self.name.trim().is_empty() { return Err(ProductError::MissingName); }
        self.status = ProductStatus::Active;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Published { product_id: self.id }));
        Ok(())
    }

    pub fn archive(&mut self) { self.status = ProductStatus::Archived; self.touch(); }

    pub fn apply(&mut self, update: ProductUpdate) -> Result<(), ProductError> {
        let currency = self.price.currency().to_string();
        if let Some(name) = update.name {
            if name.trim().is_empty() { return Err(ProductError::MissingName); }
            self.name = name;
        }
        if let Some(slug) = update.slug {
            let slug = slugify(&slug);
            if slug.is_empty() { return Err(ProductError::InvalidSlug); }
            self.slug = slug;
        }
        if let Some(description) = update.description { self.description = description; }
        if let Some(price) = update.price {
            if price.is_sign_negative() { return Err(ProductError::InvalidPrice("price must not be negative".into())); }
            self.price = Money::new(price, &currency);
        }
        if let Some(sale) = update.sale_price { self.sale_price = sale.map(|p| Money::new(p, &currency)); }
        if let Some(cost) = update.cost { self.cost = Some(Money::new(cost, &currency)); }
        if let Some(category_id) = update.category_id { self.category_id = category_id; }
        if let Some(tags) = update.tags { self.tags = tags; }
        if let Some(images) = update.images { self.images = images; }
        if let Some(featured) = update.featured { self.featured = featured; }
        if let Some(reorder_point) = update.reorder_point { self.inventory.reorder_point = reorder_point; }
        if let Some(sale) = &self.sale_price {
            if sale.is_negative() || sale.amount() >= self.price.amount() {
                return Err(ProductError::InvalidPrice("sale price must be below the list price".into()));
            }
        }
        self.touch();
        Ok(())
    }

    pub fn add_variant(&mut self, variant: Variant) -> Result<(), ProductError> {
        if variant.sku == self.sku || self.variants.iter().any(|v| v.sku == variant.sku) {
            return Err(ProductError::DuplicateVariant(variant.sku.to_string()));
        }
        if self.variants.is_empty() && self.inventory.level.reserved > 0 {
            return Err(ProductError::HasReservations(self.sku.to_string()));
        }
        // The first variant takes over the product's own stock.
        let carried = if self.variants.is_empty() { self.inventory.level.quantity } else { 0 };
        let mut variant = variant;
        variant.stock.quantity = variant.stock.quantity.checked_add(carried).ok_or(ProductError::InvalidQuantity)?;
        let movement = (carried > 0).then(|| StockMovement {
            kind: MovementKind::Adjustment, variant_sku: Some(variant.sku.clone()), quantity_delta: i64::from(carried), reserved_delta: 0,
            resulting_quantity: variant.stock.quantity, resulting_reserved: variant.stock.reserved,
            reason: Some(format!("Stock of {} moved to variant {}", self.sku, variant.sku)), actor: None, order_id: None, at: Utc::now(),
        });
        self.variants.push(variant);
        if let Some(movement) = movement { self.push_history(movement); }
        self.roll_up();
        self.touch();
        Ok(())
    }

    pub fn remove_variant(&mut self, sku: &Sku) -> Result<Variant, ProductError> {
        let idx = self.variants.iter().position(|v| &v.sku == sku).ok_or_else(|| ProductError::VariantNotFound(sku.to_string()))?;
        if self.variants[idx].stock.reserved > 0 { return Err(ProductError::HasReservations(sku.to_string())); }
        let removed = self.variants.remove(idx);
        self.roll_up();
        self.touch();
        Ok(removed)
    }

    /// Manual stock correction. Subtractions never take stock below what is reserved.
    pub fn adjust_stock(&mut self, variant: Option<&Sku>, adjustment: StockAdjustment, ctx: MovementContext) -> Result<StockMovement, ProductError> {
        let kind = match adjustment { StockAdjustment::Add(_) => MovementKind::Restock, _ => MovementKind::Adjustment };
        self.mutate_stock(variant, kind, ctx, |sku, level| match adjustment {
            StockAdjustment::Add(n) => {
                if n == 0 { return Err(ProductError::InvalidQuantity); }
                level.quantity = level.quantity.checked_add(n).ok_or(ProductError::InvalidQuantity)?;
                Ok((i64::from(n), 0))
            }
            StockAdjustment::Subtract(n) => {
                if n == 0 { return Err(ProductError::InvalidQuantity); }
                ensure_available(sku, level, n)?;
                level.quantity -= n;
                Ok((-i64::from(n), 0))
            }
            StockAdjustment::Set(n) => {
                if n < level.reserved { return Err(ProductError::BelowReserved { sku: sku.to_string(), reserved: level.reserved }); }
                let delta = i64::from(n) - i64::from(level.quantity);
                level.quantity = n;
                Ok((delta, 0))
            }
        })
    }

    /// Earmarks stock for an order.
    pub fn reserve_stock(&mut self, variant: Option<&Sku>, qty: u32, ctx: MovementContext) -> Result<StockMovement, ProductError> {
        self.mutate_stock(variant, MovementKind::Reservation, ctx, |sku, level| {
            if qty == 0 { return Err(ProductError::InvalidQuantity); }
            ensure_available(sku, level, qty)?;
            level.reserved += qty;
            Ok((0, i64::from(qty)))
        })
    }

    /// Returns reserved stock to the available pool. Releasing more than is
    /// reserved releases what is there.
    pub fn release_reserved_stock(&mut self, variant: Option<&Sku>, qty: u32, ctx: MovementContext) -> Result<StockMovement, ProductError> {
        self.mutate_stock(variant, MovementKind::Release, ctx, |_, level| {
            let released = qty.min(level.reserved);
            level.reserved -= released;
            Ok((0, -i64::from(released)))
        })
    }

    /// Converts a reservation into a sale. Any part of `qty` that is no longer
    /// reserved is taken from available stock.
    pub fn commit_reserved_stock(&mut self, variant: Option<&Sku>, qty: u32, ctx: MovementContext) -> Result<StockMovement, ProductError> {
        self.mutate_stock(variant, MovementKind::Sale, ctx, |sku, level| {
            if qty == 0 { return Err(ProductError::InvalidQuantity); }
            let from_reserved = qty.min(level.reserved);
            ensure_available(sku, level, qty - from_reserved)?;
            level.reserved -= from_reserved;
            level.quantity -= qty;
            Ok((-i64::from(qty), -i64::from(from_reserved)))
        })
    }

    /// Puts sold units back on the shelf (returns, cancellations after payment).
    pub fn restock(&mut self, variant: Option<&Sku>, qty: u32, kind: MovementKind, ctx: MovementContext) -> Result<StockMovement, ProductError> {
        self.mutate_stock(variant, kind, ctx, |_, level| {
            if qty == 0 { return Err(ProductError::InvalidQuantity); }
            level.quantity = level.quantity.checked_add(qty).ok_or(ProductError::InvalidQuantity)?;
            Ok((i64::from(qty), 0))
        })
    }

    /// Whether the order already moved this line's stock with `kind` for the same reason.
    pub fn has_order_movement(&self, variant: Option<&Sku>, kind: MovementKind, ctx: &MovementContext) -> bool {
        ctx.order_id.is_some()
            && self
                .stock_history
                .iter()
                .any(|m| m.kind == kind && m.order_id == ctx.order_id && m.variant_sku.as_ref() == variant && m.reason == ctx.reason)
    }

    fn mutate_stock<F>(&mut self, variant: Option<&Sku>, kind: MovementKind, ctx: MovementContext, op: F) -> Result<StockMovement, ProductError>
    where
        F: FnOnce(&Sku, &mut StockLevel) -> Result<(i64, i64), ProductError>,
    {
        let was_low = self.inventory.low_stock;
        let (sku, level) = self.level_mut(variant)?;
        let (quantity_delta, reserved_delta) = op(&sku, level)?;
        let movement = StockMovement {
            kind, variant_sku: variant.cloned(), quantity_delta, reserved_delta,
            resulting_quantity: level.quantity, resulting_reserved: level.reserved,
            reason: ctx.reason, actor: ctx.actor, order_id: ctx.order_id, at: Utc::now(),
        };
        let available = level.available();
        self.push_history(movement.clone());
        self.roll_up();
        self.refresh_low_stock();
        self.touch();
        if quantity_delta != 0 || reserved_delta != 0 {
            self.raise_event(DomainEvent::Product(ProductEvent::StockChanged { product_id: self.id, sku: sku.clone(), delta: quantity_delta - reserved_delta, available }));
        }
        if self.inventory.low_stock && !was_low {
            self.raise_event(DomainEvent::Product(ProductEvent::LowStock { product_id: self.id, sku, available, reorder_point: self.inventory.reorder_point }));
        }
        Ok(movement)
    }

    fn level_mut(&mut self, variant: Option<&Sku>) -> Result<(Sku, &mut StockLevel), ProductError> {
        match variant {
            Some(sku) => self
                .variants
                .iter_mut()
                .find(|v| &v.sku == sku)
                .map(|v| (v.sku.clone(), &mut v.stock))
                .ok_or_else(|| ProductError::VariantNotFound(sku.to_string())),
            None if !self.variants.is_empty() => Err(ProductError::VariantRequired),
            None => Ok((self.sku.clone(), &mut self.inventory.level)),
        }
    }

    fn push_history(&mut self, movement: StockMovement) {
        self.stock_history.push(movement);
        if self.stock_history.len() > STOCK_HISTORY_LIMIT {
            let excess = self.stock_history.len() - STOCK_HISTORY_LIMIT;
            self.stock_history.drain(..excess);
        }
    }

    fn roll_up(&mut self) {
        if self.variants.is_empty() { return; }
        self.inventory.level = StockLevel {
            quantity: self.variants.iter().map(|v| v.stock.quantity).sum(),
            reserved: self.variants.iter().map(|v| v.stock.reserved).sum(),
        };
    }

    fn refresh_low_stock(&mut self) {
        let point = self.inventory.reorder_point;
        self.inventory.low_stock = if self.variants.is_empty() {
            self.inventory.level.available() <= point
        } else {
            self.variants.iter().any(|v| v.stock.available() <= point)
        };
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn ensure_available(sku: &Sku, level: &StockLevel, requested: u32) -> Result<(), ProductError> {
    let available = level.available();
    if requested > available {
        return Err(ProductError::InsufficientInventory { sku: sku.to_string(), requested, available });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("Missing name")]
    MissingName,
    #[error("Invalid slug")]
    InvalidSlug,
    #[error("Invalid quantity")]
    InvalidQuantity,
    #[error("Invalid price: {0}")]
    InvalidPrice(String),
    #[error("Insufficient inventory for {sku}: requested {requested}, available {available}")]
    InsufficientInventory { sku: String, requested: u32, available: u32 },
    #[error("Stock for {sku} cannot be set below the {reserved} reserved units")]
    BelowReserved { sku: String, reserved: u32 },
    #[error("Product has variants; a variant sku is required")]
    VariantRequired,
    #[error("Variant {0} not found")]
    VariantNotFound(String),
    #[error("Variant sku {0} already in use")]
    DuplicateVariant(String),
    #[error("{0} has reserved stock")]
    HasReservations(String),
    #[error("Product is not available for purchase")]
    NotPurchasable,
}
