//! Products, variants and categories.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::category::{build_tree, creates_cycle};
use crate::domain::aggregates::product::{double_option, ProductImage, ProductUpdate};
use crate::domain::aggregates::{Category, CategoryNode, EntityKind, MovementContext, Product, ProductStatus, StockAdjustment, Variant};
use crate::domain::value_objects::{slugify, Money, Sku};
use crate::events::EventPublisher;
use crate::services::{AuditService, AuthUser, SettingsService};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProduct {
    pub sku: Sku,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub featured: bool,
    /// Opening stock for products without variants.
    #[serde(default)]
    pub stock: u32,
    pub reorder_point: Option<u32>,
    #[serde(default)]
    pub variants: Vec<NewVariant>,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewVariant {
    pub sku: Sku,
    pub size: Option<String>,
    pub color: Option<String>,
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stock: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub status: Option<ProductStatus>,
    pub category_id: Option<Uuid>,
    pub featured: Option<bool>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCategory {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<Uuid>>,
    pub image_url: Option<String>,
    pub active: Option<bool>,
    pub sort_order: Option<i32>,
}

#[derive(Clone)]
pub struct CatalogService {
    products: Repository<Product>,
    categories: Repository<Category>,
    settings: SettingsService,
    audit: AuditService,
    events: EventPublisher,
}

impl CatalogService {
    pub fn new(
        products: Repository<Product>,
        categories: Repository<Category>,
        settings: SettingsService,
        audit: AuditService,
        events: EventPublisher,
    ) -> Self {
        Self { products, categories, settings, audit, events }
    }

    // ── Products ──

    pub async fn create_product(&self, req: CreateProduct, actor: &AuthUser) -> Result<Product> {
        req.validate()?;
        if req.price.is_sign_negative() {
            return Err(EcommerceError::Validation("price must not be negative".into()));
        }
        if let Some(category_id) = req.category_id {
            self.categories.require(category_id).await?;
        }
        let settings = self.settings.get().await?;
        let currency = settings.currency.as_str();

        let mut product = Product::create(req.sku.clone(), req.name.trim(), Money::new(req.price, currency))
            .with_description(req.description)
            .with_category(req.category_id)
            .with_reorder_point(req.reorder_point.unwrap_or(settings.default_reorder_point));
        product.apply(ProductUpdate {
            sale_price: req.sale_price.map(Some),
            cost: req.cost,
            tags: Some(req.tags),
            images: Some(req.images),
            featured: Some(req.featured),
            ..ProductUpdate::default()
        })?;
        for v in req.variants {
            let price = v.price.map(|p| Money::new(p, currency));
            product.add_variant(Variant::new(v.sku, v.size, v.color, price, v.stock))?;
        }
        if req.stock > 0 {
            product.adjust_stock(None, StockAdjustment::Add(req.stock), MovementContext::by(Some(actor.id), Some("Opening stock".into())))?;
        }
        if req.publish {
            product.publish()?;
        }

        let mut product = self.products.insert(product).await?;
        tracing::info!(product_id = %product.id(), sku = %product.sku(), "product created");
        self.events.publish(product.take_events()).await;
        self.audit
            .record(Some(actor.id), "product.created", EntityKind::Product, Some(product.id()), json!({ "sku": product.sku(), "name": product.name() }))
            .await;
        Ok(product)
    }

    pub async fn update_product(&self, id: Uuid, update: ProductUpdate, actor: &AuthUser) -> Result<Product> {
        if let Some(Some(category_id)) = update.category_id {
            self.categories.require(category_id).await?;
        }
        let details = json!({
            "name": update.name, "price": update.price, "sale_price": update.sale_price,
            "category_id": update.category_id, "featured": update.featured,
        });
        let (product, _) = self.products.update(id, |p| p.apply(update.clone()).map_err(Into::into)).await?;
        self.audit.record(Some(actor.id), "product.updated", EntityKind::Product, Some(id), details).await;
        Ok(product)
    }

    pub async fn publish_product(&self, id: Uuid, actor: &AuthUser) -> Result<Product> {
        let (mut product, _) = self.products.update(id, |p| p.publish().map_err(Into::into)).await?;
        self.events.publish(product.take_events()).await;
        self.audit.record(Some(actor.id), "product.published", EntityKind::Product, Some(id), json!({})).await;
        Ok(product)
    }

    /// Products are archived rather than removed; orders keep referring to them.
    pub async fn archive_product(&self, id: Uuid, actor: &AuthUser) -> Result<Product> {
        let (product, _) = self.products.update(id, |p| { p.archive(); Ok(()) }).await?;
        self.audit.record(Some(actor.id), "product.archived", EntityKind::Product, Some(id), json!({})).await;
        Ok(product)
    }

    pub async fn add_variant(&self, id: Uuid, variant: NewVariant, actor: &AuthUser) -> Result<Product> {
        let sku = variant.sku.clone();
        let (product, _) = self
            .products
            .update(id, |p| {
                let price = variant.price.map(|amount| Money::new(amount, p.price().currency()));
                let new = Variant::new(variant.sku.clone(), variant.size.clone(), variant.color.clone(), price, variant.stock);
                p.add_variant(new).map_err(Into::into)
            })
            .await?;
        self.audit.record(Some(actor.id), "product.variant_added", EntityKind::Product, Some(id), json!({ "sku": sku })).await;
        Ok(product)
    }

    pub async fn remove_variant(&self, id: Uuid, sku: &Sku, actor: &AuthUser) -> Result<Product> {
        let (product, _) = self.products.update(id, |p| p.remove_variant(sku).map(|_| ()).map_err(Into::into)).await?;
        self.audit.record(Some(actor.id), "product.variant_removed", EntityKind::Product, Some(id), json!({ "sku": sku })).await;
        Ok(product)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product> { self.products.require(id).await }

    /// A product as shoppers see it: only active products exist.
    pub async fn get_active_product(&self, id: Uuid) -> Result<Product> {
        self.products.get(id).await?.filter(Product::is_active).ok_or(EcommerceError::NotFound("Product"))
    }

    pub async fn get_active_by_slug(&self, slug: &str) -> Result<Product> {
        self.products
            .find_one(&Filter::new().eq("slug", slugify(slug)).eq("status", ProductStatus::Active))
            .await?
            .ok_or(EcommerceError::NotFound("Product"))
    }

    pub async fn list_products(&self, query: ProductQuery, page: Page) -> Result<PaginatedResponse<Product>> {
        let filter = Filter::new()
            .eq_opt("status", query.status)
            .eq_opt("category_id", query.category_id)
            .eq_opt("featured", query.featured)
            .eq_opt("tags", query.tag.map(|t| vec![t]))
            .search(&["name", "sku", "description"], query.search.as_deref());
        self.products.find(&filter, page).await
    }

    // ── Categories ──

    pub async fn create_category(&self, req: CreateCategory, actor: &AuthUser) -> Result<Category> {
        req.validate()?;
        if let Some(parent) = req.parent_id {
            self.categories.require(parent).await?;
        }
        let mut category = Category::new(req.name.trim(), req.description, req.parent_id);
        if let Some(slug) = req.slug {
            category.slug = slugify(&slug);
        }
        if category.slug.is_empty() {
            return Err(EcommerceError::Validation("slug must contain letters or digits".into()));
        }
        category.image_url = req.image_url;
        category.sort_order = req.sort_order;
        let category = self.categories.insert(category).await?;
        self.audit
            .record(Some(actor.id), "category.created", EntityKind::Category, Some(category.id), json!({ "slug": category.slug }))
            .await;
        Ok(category)
    }

    pub async fn update_category(&self, id: Uuid, req: UpdateCategory, actor: &AuthUser) -> Result<Category> {
        if let Some(Some(parent)) = req.parent_id {
            let all = self.categories.find_all(&Filter::new()).await?;
            if !all.iter().any(|c| c.id == parent) {
                return Err(EcommerceError::NotFound("Category"));
            }
            if creates_cycle(id, parent, &all) {
                return Err(EcommerceError::Validation("A category cannot be nested under itself or its descendants".into()));
            }
        }
        let (category, _) = self
            .categories
            .update(id, |c| {
                if let Some(name) = &req.name {
                    if name.trim().is_empty() { return Err(EcommerceError::Validation("name is required".into())); }
                    c.name = name.trim().to_string();
                }
                if let Some(slug) = &req.slug {
                    let slug = slugify(slug);
                    if slug.is_empty() { return Err(EcommerceError::Validation("slug must contain letters or digits".into())); }
                    c.slug = slug;
                }
                if req.description.is_some() { c.description = req.description.clone(); }
                if let Some(parent) = req.parent_id { c.parent_id = parent; }
                if req.image_url.is_some() { c.image_url = req.image_url.clone(); }
                if let Some(active) = req.active { c.active = active; }
                if let Some(sort_order) = req.sort_order { c.sort_order = sort_order; }
                Ok(())
            })
            .await?;
        self.audit.record(Some(actor.id), "category.updated", EntityKind::Category, Some(id), json!({ "slug": category.slug })).await;
        Ok(category)
    }

    /// Refuses while products or child categories still point at the category.
    pub async fn delete_category(&self, id: Uuid, actor: &AuthUser) -> Result<()> {
        self.categories.require(id).await?;
        if self.products.find_one(&Filter::new().eq("category_id", id)).await?.is_some() {
            return Err(EcommerceError::Conflict("Category still has products".into()));
        }
        if self.categories.find_one(&Filter::new().eq("parent_id", id)).await?.is_some() {
            return Err(EcommerceError::Conflict("Category still has subcategories".into()));
        }
        self.categories.delete(id).await?;
        self.audit.record(Some(actor.id), "category.deleted", EntityKind::Category, Some(id), json!({})).await;
        Ok(())
    }

    pub async fn get_category(&self, id: Uuid) -> Result<Category> { self.categories.require(id).await }

    pub async fn list_categories(&self, active_only: bool) -> Result<Vec<Category>> {
        let filter = if active_only { Filter::new().eq("active", true) } else { Filter::new() };
        let mut all = self.categories.find_all(&filter).await?;
        all.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
        Ok(all)
    }

    pub async fn category_tree(&self, active_only: bool) -> Result<Vec<CategoryNode>> {
        Ok(build_tree(self.list_categories(active_only).await?))
    }
}
