//! Storefront - Self-hosted Commerce API
//!
//! Catalog, inventory, carts, orders, payments and customer support behind a
//! single JSON/HTTP service.
//!
//! ## Features
//! - Product catalog with variants and categories
//! - Inventory reservation with conflict-checked stock updates
//! - Shopping cart and checkout
//! - Order lifecycle with returns and refunds
//! - Stripe payments and webhooks
//! - Support tickets with SLA tracking
//! - Content, settings, media records and audit trail

pub mod api;
pub mod config;
pub mod domain;
pub mod events;
pub mod services;
pub mod store;
pub mod stripe;

#[cfg(test)]
pub(crate) mod test_utils;

use thiserror::Error;

use crate::domain::aggregates::{CartError, OrderError, ProductError, TicketError};
use crate::domain::value_objects::{MoneyError, SkuError};
use crate::store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Document was modified concurrently, please retry")]
    ConcurrentModification,

    #[error("Payment error: {0}")]
    Payment(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Sku(#[from] SkuError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<validator::ValidationErrors> for EcommerceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
