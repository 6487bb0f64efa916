use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::{ApiResult, AppState, ListParams};
use crate::domain::aggregates::{Content, ContentKind};
use crate::services::content::{ContentQuery, CreateContent, UpdateContent};
use crate::services::AuthUser;
use crate::store::PaginatedResponse;

#[derive(Debug, Default, Deserialize)]
pub struct LiveParams {
    pub kind: Option<ContentKind>,
}

pub async fn live(State(s): State<AppState>, Query(q): Query<LiveParams>) -> ApiResult<Json<Vec<Content>>> {
    Ok(Json(s.services.content.live(q.kind).await?))
}

pub async fn by_slug(State(s): State<AppState>, Path(slug): Path<String>) -> ApiResult<Json<Content>> {
    Ok(Json(s.services.content.live_by_slug(&slug).await?))
}

pub async fn admin_list(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
    Query(q): Query<ContentQuery>,
) -> ApiResult<Json<PaginatedResponse<Content>>> {
    Ok(Json(s.services.content.list(q, p.page()).await?))
}

pub async fn admin_get(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Content>> {
    Ok(Json(s.services.content.get(id).await?))
}

pub async fn create(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateContent>,
) -> ApiResult<(StatusCode, Json<Content>)> {
    Ok((StatusCode::CREATED, Json(s.services.content.create(req, &user).await?)))
}

pub async fn update(
    State(s): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateContent>,
) -> ApiResult<Json<Content>> {
    Ok(Json(s.services.content.update(id, req, &user).await?))
}

pub async fn delete(State(s): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.services.content.delete(id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
