use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::{ApiResult, AppState};
use crate::domain::aggregates::Order;
use crate::domain::value_objects::Sku;
use crate::services::cart::{AddToCart, CartView, Checkout, UpdateCartItem};
use crate::services::AuthUser;

#[derive(Debug, Default, Deserialize)]
pub struct VariantParams {
    pub variant_sku: Option<Sku>,
}

pub async fn get(State(s): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.get(&user).await?.into()))
}

pub async fn add_item(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Json(req): Json<AddToCart>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.add_item(&user, req).await?.into()))
}

pub async fn update_item(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<UpdateCartItem>,
) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.update_item(&user, product_id, req).await?.into()))
}

pub async fn remove_item(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<Uuid>,
    Query(q): Query<VariantParams>,
) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.remove_item(&user, product_id, q.variant_sku).await?.into()))
}

pub async fn clear(State(s): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.clear(&user).await?.into()))
}

pub async fn checkout(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Json(req): Json<Checkout>) -> ApiResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.services.carts.checkout(&user, req).await?)))
}
