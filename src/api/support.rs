use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::{ApiResult, AppState, ListParams};
use crate::domain::aggregates::{TicketPriority, TicketStatus};
use crate::services::support::{CreateTicket, NewMessage, SupportStats, TicketQuery, TicketView};
use crate::services::AuthUser;
use crate::store::PaginatedResponse;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: TicketStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Assignment {
    pub staff_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityUpdate {
    pub priority: TicketPriority,
}

pub async fn open(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Json(req): Json<CreateTicket>) -> ApiResult<(StatusCode, Json<TicketView>)> {
    Ok((StatusCode::CREATED, Json(s.services.support.open(&user, req).await?)))
}

pub async fn list_mine(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(p): Query<ListParams>,
) -> ApiResult<Json<PaginatedResponse<TicketView>>> {
    Ok(Json(s.services.support.list_for_customer(&user, p.page()).await?))
}

pub async fn get(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<Json<TicketView>> {
    Ok(Json(s.services.support.get_for(id, &user).await?))
}

pub async fn add_message(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(msg): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<TicketView>)> {
    Ok((StatusCode::CREATED, Json(s.services.support.add_message(id, &user, msg).await?)))
}

pub async fn admin_list(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<TicketQuery>,
) -> ApiResult<Json<PaginatedResponse<TicketView>>> {
    Ok(Json(s.services.support.list(q, p.page()).await?))
}

pub async fn update_status(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> ApiResult<Json<TicketView>> {
    Ok(Json(s.services.support.update_status(id, req.status, req.note, &user).await?))
}

pub async fn assign(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<Assignment>,
) -> ApiResult<Json<TicketView>> {
    Ok(Json(s.services.support.assign(id, req.staff_id, &user).await?))
}

pub async fn set_priority(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<PriorityUpdate>,
) -> ApiResult<Json<TicketView>> {
    Ok(Json(s.services.support.set_priority(id, req.priority, &user).await?))
}

pub async fn stats(State(s): State<AppState>) -> ApiResult<Json<SupportStats>> {
    Ok(Json(s.services.support.stats().await?))
}
