//! Order endpoints. Customers place, view, cancel and return their own
//! orders; staff drive fulfilment, returns and refunds.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::{ApiResult, AppState, ListParams};
use crate::domain::aggregates::order::Refund;
use crate::domain::aggregates::{Order, OrderStatus, ReturnItem, ReturnStatus};
use crate::services::order::{CreateOrder, OrderQuery, OrderStats};
use crate::services::AuthUser;
use crate::store::PaginatedResponse;

#[derive(Debug, Default, Deserialize)]
pub struct MyOrdersParams {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnRequestBody {
    pub items: Vec<ReturnItem>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackingUpdate {
    pub carrier: String,
    pub tracking_number: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturnUpdate {
    pub status: ReturnStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
    pub reason: String,
}

pub async fn create(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Json(req): Json<CreateOrder>) -> ApiResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.services.orders.create(&user, req).await?)))
}

pub async fn list_mine(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(p): Query<ListParams>,
    Query(q): Query<MyOrdersParams>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    Ok(Json(s.services.orders.list_for_customer(&user, q.status, p.page()).await?))
}

pub async fn get(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.orders.get_for(id, &user).await?))
}

/// Shared by customers and staff; the service applies the customer restrictions.
pub async fn cancel(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<Order>> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(s.services.orders.cancel(id, reason, &user).await?))
}

pub async fn request_return(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReturnRequestBody>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.services.orders.request_return(id, req.items, req.reason, &user).await?)))
}

// ── Staff ──

pub async fn admin_list(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<OrderQuery>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    Ok(Json(s.services.orders.list(q, p.page()).await?))
}

pub async fn admin_get(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.orders.get(id).await?))
}

pub async fn update_status(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.orders.update_status(id, req.status, req.note, &user).await?))
}

pub async fn set_tracking(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<TrackingUpdate>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.orders.set_tracking(id, req.carrier, req.tracking_number, &user).await?))
}

pub async fn update_return(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, return_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReturnUpdate>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.orders.update_return(id, return_id, req.status, req.note, &user).await?))
}

pub async fn refund(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<(StatusCode, Json<Refund>)> {
    Ok((StatusCode::CREATED, Json(s.services.orders.refund(id, req.amount, req.reason, &user).await?)))
}

pub async fn stats(State(s): State<AppState>) -> ApiResult<Json<OrderStats>> {
    Ok(Json(s.services.orders.stats().await?))
}
