//! Store administration: settings, media records, audit trail and users.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::{ApiResult, AppState, ListParams};
use crate::domain::aggregates::{AuditLog, Media, Role, Settings, SettingsUpdate, UserProfile};
use crate::services::audit::AuditQuery;
use crate::services::media::{CreateMedia, MediaQuery, UpdateMedia};
use crate::services::AuthUser;
use crate::store::PaginatedResponse;

pub async fn get_settings(State(s): State<AppState>) -> ApiResult<Json<Settings>> {
    Ok(Json(s.services.settings.get().await?))
}

pub async fn update_settings(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    Ok(Json(s.services.settings.update(req, &user).await?))
}

// ── Media ──

pub async fn list_media(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<MediaQuery>,
) -> ApiResult<Json<PaginatedResponse<Media>>> {
    Ok(Json(s.services.media.list(q, p.page()).await?))
}

pub async fn get_media(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Media>> {
    Ok(Json(s.services.media.get(id).await?))
}

pub async fn create_media(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateMedia>,
) -> ApiResult<(StatusCode, Json<Media>)> {
    Ok((StatusCode::CREATED, Json(s.services.media.create(req, &user).await?)))
}

pub async fn update_media(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateMedia>,
) -> ApiResult<Json<Media>> {
    Ok(Json(s.services.media.update(id, req, &user).await?))
}

pub async fn delete_media(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.services.media.delete(id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Audit ──

pub async fn audit_logs(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Json<PaginatedResponse<AuditLog>>> {
    Ok(Json(s.services.audit.query(q, p.page()).await?))
}

// ── Users (admin only) ──

#[derive(Debug, Default, Deserialize)]
pub struct UserListParams {
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct ActiveUpdate {
    pub active: bool,
}

pub async fn list_users(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<UserListParams>,
) -> ApiResult<Json<PaginatedResponse<UserProfile>>> {
    Ok(Json(s.services.auth.list_users(q.role, q.search.as_deref(), p.page()).await?))
}

pub async fn set_role(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleUpdate>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(s.services.auth.set_role(id, req.role, &user).await?))
}

pub async fn set_active(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActiveUpdate>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(s.services.auth.set_active(id, req.active, &user).await?))
}
