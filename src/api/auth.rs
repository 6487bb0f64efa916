use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;

use super::extract::Json;
use super::{ApiResult, AppState};
use crate::domain::aggregates::UserProfile;
use crate::services::auth::{AuthResponse, LoginRequest, RegisterRequest};
use crate::services::AuthUser;

pub async fn register(State(s): State<AppState>, Json(req): Json<RegisterRequest>) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    Ok((StatusCode::CREATED, Json(s.services.auth.register(req).await?)))
}

pub async fn login(State(s): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Json<AuthResponse>> {
    Ok(Json(s.services.auth.login(req).await?))
}

pub async fn me(State(s): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Json<UserProfile>> {
    Ok(Json(s.services.auth.me(user.id).await?))
}
