//! Catalog endpoints: the public storefront view plus staff management of
//! products, variants, stock and categories.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::{ApiResult, AppState, ListParams};
use crate::domain::aggregates::product::StockMovement;
use crate::domain::aggregates::{Category, CategoryNode, Product, ProductStatus, ProductUpdate};
use crate::domain::value_objects::Sku;
use crate::services::catalog::{CreateCategory, CreateProduct, NewVariant, ProductQuery, UpdateCategory};
use crate::services::inventory::{AdjustStock, LowStockItem};
use crate::services::AuthUser;
use crate::store::{PaginatedResponse, StoreError};
use crate::EcommerceError;

// ── Storefront ──

/// Product as shoppers see it: without cost price or stock movements.
fn storefront_view(product: &Product) -> ApiResult<Value> {
    let mut value = serde_json::to_value(product).map_err(StoreError::from)?;
    if let Some(fields) = value.as_object_mut() {
        fields.remove("cost");
        fields.remove("stock_history");
    }
    Ok(value)
}

pub async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(mut q): Query<ProductQuery>,
) -> ApiResult<Json<PaginatedResponse<Value>>> {
    q.status = Some(ProductStatus::Active);
    let found = s.services.catalog.list_products(q, p.page()).await?;
    let data = found.data.iter().map(storefront_view).collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(PaginatedResponse { data, total: found.total, page: found.page }))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    Ok(Json(storefront_view(&s.services.catalog.get_active_product(id).await?)?))
}

pub async fn get_product_by_slug(State(s): State<AppState>, Path(slug): Path<String>) -> ApiResult<Json<Value>> {
    Ok(Json(storefront_view(&s.services.catalog.get_active_by_slug(&slug).await?)?))
}

pub async fn list_categories(State(s): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(s.services.catalog.list_categories(true).await?))
}

pub async fn category_tree(State(s): State<AppState>) -> ApiResult<Json<Vec<CategoryNode>>> {
    Ok(Json(s.services.catalog.category_tree(true).await?))
}

pub async fn get_category(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Category>> {
    let category = s.services.catalog.get_category(id).await?;
    if !category.active {
        return Err(EcommerceError::NotFound("Category"));
    }
    Ok(Json(category))
}

// ── Products (staff) ──

pub async fn admin_list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<ProductQuery>,
) -> ApiResult<Json<PaginatedResponse<Product>>> {
    Ok(Json(s.services.catalog.list_products(q, p.page()).await?))
}

pub async fn admin_get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.get_product(id).await?))
}

pub async fn create_product(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    Ok((StatusCode::CREATED, Json(s.services.catalog.create_product(req, &user).await?)))
}

pub async fn update_product(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProductUpdate>,
) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.update_product(id, req, &user).await?))
}

pub async fn publish_product(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.publish_product(id, &user).await?))
}

pub async fn archive_product(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.archive_product(id, &user).await?))
}

pub async fn add_variant(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewVariant>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    Ok((StatusCode::CREATED, Json(s.services.catalog.add_variant(id, req, &user).await?)))
}

pub async fn remove_variant(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, sku)): Path<(Uuid, Sku)>,
) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.remove_variant(id, &sku, &user).await?))
}

// ── Inventory (staff) ──

#[derive(Debug, Serialize)]
pub struct AdjustStockResponse {
    pub product: Product,
    pub movement: StockMovement,
}

pub async fn adjust_stock(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdjustStock>,
) -> ApiResult<Json<AdjustStockResponse>> {
    let (product, movement) = s.services.inventory.adjust(id, req, &user).await?;
    Ok(Json(AdjustStockResponse { product, movement }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub variant_sku: Option<Sku>,
}

pub async fn stock_history(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<HistoryParams>,
) -> ApiResult<Json<Vec<StockMovement>>> {
    Ok(Json(s.services.inventory.history(id, q.variant_sku.as_ref()).await?))
}

pub async fn low_stock(State(s): State<AppState>, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<LowStockItem>>> {
    Ok(Json(s.services.inventory.low_stock(p.page()).await?))
}

// ── Categories (staff) ──

pub async fn admin_list_categories(State(s): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(s.services.catalog.list_categories(false).await?))
}

pub async fn create_category(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateCategory>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    Ok((StatusCode::CREATED, Json(s.services.catalog.create_category(req, &user).await?)))
}

pub async fn update_category(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCategory>,
) -> ApiResult<Json<Category>> {
    Ok(Json(s.services.catalog.update_category(id, req, &user).await?))
}

pub async fn delete_category(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.services.catalog.delete_category(id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
