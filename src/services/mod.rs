//! Application services: the use cases the HTTP layer calls into.

pub mod audit;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod content;
pub mod inventory;
pub mod media;
pub mod order;
pub mod payment;
pub mod settings;
pub mod support;

pub use audit::AuditService;
pub use auth::{AuthService, AuthUser};
pub use cart::CartService;
pub use catalog::CatalogService;
pub use content::ContentService;
pub use inventory::InventoryService;
pub use media::MediaService;
pub use order::OrderService;
pub use payment::PaymentService;
pub use settings::SettingsService;
pub use support::SupportService;

use std::sync::Arc;

use crate::config::Config;
use crate::events::EventPublisher;
use crate::store::{DocumentStore, Repository};
use crate::stripe::PaymentGateway;

/// Every service, wired to one store, event publisher and payment gateway.
#[derive(Clone)]
pub struct Services {
    pub auth: AuthService,
    pub catalog: CatalogService,
    pub inventory: InventoryService,
    pub orders: OrderService,
    pub carts: CartService,
    pub payments: PaymentService,
    pub support: SupportService,
    pub content: ContentService,
    pub settings: SettingsService,
    pub media: MediaService,
    pub audit: AuditService,
}

impl Services {
    pub fn new(config: &Config, store: Arc<dyn DocumentStore>, events: EventPublisher, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        let audit = AuditService::new(Repository::new(store.clone()));
        let settings = SettingsService::new(Repository::new(store.clone()), audit.clone(), config.default_currency.clone());
        let content = ContentService::new(Repository::new(store.clone()), audit.clone());
        let inventory = InventoryService::new(Repository::new(store.clone()), audit.clone(), events.clone());
        let catalog = CatalogService::new(
            Repository::new(store.clone()),
            Repository::new(store.clone()),
            settings.clone(),
            audit.clone(),
            events.clone(),
        );
        let orders = OrderService::new(
            Repository::new(store.clone()),
            Repository::new(store.clone()),
            inventory.clone(),
            settings.clone(),
            content.clone(),
            audit.clone(),
            events.clone(),
            gateway.clone(),
        );
        let carts = CartService::new(Repository::new(store.clone()), Repository::new(store.clone()), orders.clone(), settings.clone());
        let payments = PaymentService::new(
            Repository::new(store.clone()),
            Repository::new(store.clone()),
            Repository::new(store.clone()),
            inventory.clone(),
            audit.clone(),
            events.clone(),
            gateway,
        );
        let support = SupportService::new(Repository::new(store.clone()), Repository::new(store.clone()), audit.clone(), events);
        let media = MediaService::new(Repository::new(store.clone()), audit.clone());
        let auth = AuthService::new(Repository::new(store), audit.clone(), config.jwt_secret.clone(), config.jwt_expiry_hours);

        Self { auth, catalog, inventory, orders, carts, payments, support, content, settings, media, audit }
    }
}
