//! HTTP API: routing, authentication and error responses.

pub mod admin;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod content;
mod extract;
pub mod orders;
pub mod payments;
pub mod support;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::domain::aggregates::{CartError, OrderError, ProductError, Role, TicketError};
use crate::services::{AuthUser, Services};
use crate::store::Page;
use crate::EcommerceError;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

pub type ApiResult<T> = std::result::Result<T, EcommerceError>;

/// `?page=&per_page=` on every list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListParams {
    pub fn page(&self) -> Page { Page::new(self.page, self.per_page) }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/products", get(catalog::list_products))
        .route("/api/v1/products/:id", get(catalog::get_product))
        .route("/api/v1/products/slug/:slug", get(catalog::get_product_by_slug))
        .route("/api/v1/categories", get(catalog::list_categories))
        .route("/api/v1/categories/tree", get(catalog::category_tree))
        .route("/api/v1/categories/:id", get(catalog::get_category))
        .route("/api/v1/content", get(content::live))
        .route("/api/v1/content/:slug", get(content::by_slug))
        // Signature-verified, raw body
        .route("/api/v1/payments/webhook", post(payments::webhook));

    let customer = Router::new()
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/cart", get(cart::get).delete(cart::clear))
        .route("/api/v1/cart/items", post(cart::add_item))
        .route("/api/v1/cart/items/:product_id", put(cart::update_item).delete(cart::remove_item))
        .route("/api/v1/checkout", post(cart::checkout))
        .route("/api/v1/orders", get(orders::list_mine).post(orders::create))
        .route("/api/v1/orders/:id", get(orders::get))
        .route("/api/v1/orders/:id/cancel", post(orders::cancel))
        .route("/api/v1/orders/:id/returns", post(orders::request_return))
        .route("/api/v1/payments/intent", post(payments::create_intent))
        .route("/api/v1/support/tickets", get(support::list_mine).post(support::open))
        .route("/api/v1/support/tickets/:id", get(support::get))
        .route("/api/v1/support/tickets/:id/messages", post(support::add_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let users = Router::new()
        .route("/api/v1/admin/users", get(admin::list_users))
        .route("/api/v1/admin/users/:id/role", put(admin::set_role))
        .route("/api/v1/admin/users/:id/active", put(admin::set_active))
        .route_layer(middleware::from_fn(require_admin));

    let staff = Router::new()
        .route("/api/v1/admin/products", get(catalog::admin_list_products).post(catalog::create_product))
        .route("/api/v1/admin/products/:id", get(catalog::admin_get_product).patch(catalog::update_product))
        .route("/api/v1/admin/products/:id/publish", post(catalog::publish_product))
        .route("/api/v1/admin/products/:id/archive", post(catalog::archive_product))
        .route("/api/v1/admin/products/:id/variants", post(catalog::add_variant))
        .route("/api/v1/admin/products/:id/variants/:sku", delete(catalog::remove_variant))
        .route("/api/v1/admin/products/:id/stock", post(catalog::adjust_stock))
        .route("/api/v1/admin/products/:id/stock/history", get(catalog::stock_history))
        .route("/api/v1/admin/inventory/low-stock", get(catalog::low_stock))
        .route("/api/v1/admin/categories", get(catalog::admin_list_categories).post(catalog::create_category))
        .route("/api/v1/admin/categories/:id", patch(catalog::update_category).delete(catalog::delete_category))
        .route("/api/v1/admin/orders", get(orders::admin_list))
        .route("/api/v1/admin/orders/stats", get(orders::stats))
        .route("/api/v1/admin/orders/:id", get(orders::admin_get))
        .route("/api/v1/admin/orders/:id/status", put(orders::update_status))
        .route("/api/v1/admin/orders/:id/tracking", put(orders::set_tracking))
        .route("/api/v1/admin/orders/:id/cancel", post(orders::cancel))
        .route("/api/v1/admin/orders/:id/returns/:return_id", put(orders::update_return))
        .route("/api/v1/admin/orders/:id/refunds", post(orders::refund))
        .route("/api/v1/admin/content", get(content::admin_list).post(content::create))
        .route("/api/v1/admin/content/:id", get(content::admin_get).patch(content::update).delete(content::delete))
        .route("/api/v1/admin/settings", get(admin::get_settings).put(admin::update_settings))
        .route("/api/v1/admin/media", get(admin::list_media).post(admin::create_media))
        .route("/api/v1/admin/media/:id", get(admin::get_media).patch(admin::update_media).delete(admin::delete_media))
        .route("/api/v1/admin/audit-logs", get(admin::audit_logs))
        .route("/api/v1/admin/support/tickets", get(support::admin_list))
        .route("/api/v1/admin/support/stats", get(support::stats))
        .route("/api/v1/admin/support/tickets/:id", get(support::get))
        .route("/api/v1/admin/support/tickets/:id/status", put(support::update_status))
        .route("/api/v1/admin/support/tickets/:id/assign", put(support::assign))
        .route("/api/v1/admin/support/tickets/:id/priority", put(support::set_priority))
        .route("/api/v1/admin/support/tickets/:id/messages", post(support::add_message))
        .merge(users)
        .route_layer(middleware::from_fn(require_staff))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new().merge(public).merge(customer).merge(staff).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storefront",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Verifies the bearer token against the stored account and keeps the caller
/// as an [`AuthUser`] extension.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> ApiResult<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EcommerceError::Unauthorized("Missing Authorization header".into()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| EcommerceError::Unauthorized("Invalid Authorization format".into()))?;
    let user = state.services.auth.authenticate(token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub async fn require_staff(Extension(user): Extension<AuthUser>, request: Request, next: Next) -> ApiResult<Response> {
    if !user.is_staff() {
        return Err(EcommerceError::Forbidden);
    }
    Ok(next.run(request).await)
}

pub async fn require_admin(Extension(user): Extension<AuthUser>, request: Request, next: Next) -> ApiResult<Response> {
    if user.role != Role::Admin {
        return Err(EcommerceError::Forbidden);
    }
    Ok(next.run(request).await)
}

impl EcommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::Sku(_) | Self::Money(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::ConcurrentModification => StatusCode::CONFLICT,
            Self::Payment(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Product(e) => match e {
                ProductError::VariantNotFound(_) => StatusCode::NOT_FOUND,
                ProductError::InsufficientInventory { .. } | ProductError::BelowReserved { .. } | ProductError::HasReservations(_) => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Order(e) => match e {
                OrderError::ReturnNotFound | OrderError::RefundNotFound => StatusCode::NOT_FOUND,
                OrderError::InvalidTransition { .. }
                | OrderError::InvalidReturnTransition { .. }
                | OrderError::AlreadyPaid
                | OrderError::NotPayable
                | OrderError::NotEditable
                | OrderError::RefundNotPending => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Cart(CartError::ItemNotFound) => StatusCode::NOT_FOUND,
            Self::Cart(_) => StatusCode::BAD_REQUEST,
            Self::Ticket(TicketError::Closed | TicketError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Self::Ticket(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            if status == StatusCode::BAD_GATEWAY {
                tracing::error!(error = %self, "payment gateway failure");
            } else {
                tracing::debug!(%status, error = %self, "request rejected");
            }
            self.to_string()
        };
        (status, Json(serde_json::json!({ "success": false, "message": message }))).into_response()
    }
}
