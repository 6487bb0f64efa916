//! Shared test utilities.
//!
//! [`TestApp`] wires every service to an in-memory store and a fake payment
//! gateway, and offers helpers that create entities with sensible defaults.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::aggregates::{Address, Order, Product, Role, User};
use crate::domain::value_objects::Sku;
use crate::events::EventPublisher;
use crate::services::catalog::CreateProduct;
use crate::services::{AuthUser, Services};
use crate::store::{DocumentStore, MemoryStore, Repository};
use crate::stripe::{verify_webhook_signature, IntentRequest, PaymentGateway, PaymentIntent};
use crate::{EcommerceError, Result};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn test_config() -> Config {
    Config {
        port: 0,
        database_url: None,
        database_max_connections: 1,
        jwt_secret: "test-secret-at-least-16-chars".into(),
        jwt_expiry_hours: 1,
        stripe: None,
        nats_url: None,
        admin: None,
        default_currency: "USD".into(),
    }
}

/// Records calls instead of talking to a processor.
#[derive(Default)]
pub struct FakeGateway {
    customers: AtomicUsize,
    intents: AtomicUsize,
    refunds: Mutex<Vec<(String, i64)>>,
    fail_refunds: AtomicBool,
}

impl FakeGateway {
    pub fn customers_created(&self) -> usize { self.customers.load(Ordering::SeqCst) }
    pub fn refunds(&self) -> Vec<(String, i64)> { self.refunds.lock().unwrap().clone() }
    pub fn fail_refunds(&self, fail: bool) { self.fail_refunds.store(fail, Ordering::SeqCst); }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(&self, _email: &str, _user_id: Uuid) -> Result<String> {
        let n = self.customers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_test_{n}"))
    }

    async fn create_payment_intent(&self, request: IntentRequest<'_>) -> Result<PaymentIntent> {
        let n = self.intents.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent { id: format!("pi_test_{n}"), client_secret: format!("pi_test_{n}_secret_{}", request.amount_minor) })
    }

    async fn refund(&self, intent_id: &str, amount_minor: i64) -> Result<String> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(EcommerceError::Payment("Stripe error: charge already refunded".into()));
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((intent_id.to_string(), amount_minor));
        Ok(format!("re_test_{}", refunds.len()))
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_webhook_signature(payload, signature_header, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
            .map_err(|e| EcommerceError::Validation(e.to_string()))
    }
}

pub struct TestApp {
    pub store: Arc<dyn DocumentStore>,
    pub services: Services,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let services = Services::new(&test_config(), store.clone(), EventPublisher::default(), Some(gateway.clone() as Arc<dyn PaymentGateway>));
        Self { store, services, gateway }
    }

    /// An administrator stored with an unusable password hash.
    pub async fn admin(&self) -> AuthUser {
        self.user("admin@example.com", Role::Admin).await
    }

    pub async fn customer(&self, email: &str) -> AuthUser {
        self.user(email, Role::Customer).await
    }

    async fn user(&self, email: &str, role: Role) -> AuthUser {
        if let Some(existing) = self.services.auth.find_by_email(email).await.unwrap() {
            return AuthUser { id: existing.id(), email: existing.email().to_string(), role: existing.role() };
        }
        let users: Repository<User> = Repository::new(self.store.clone());
        let user = users.insert(User::new(email, "Test User", "not-a-hash".into(), role)).await.unwrap();
        AuthUser { id: user.id(), email: user.email().to_string(), role }
    }

    /// An active product without variants.
    pub async fn product(&self, sku: &str, stock: u32, price: i64) -> Product {
        let mut req = create_product_request(sku, price);
        req.stock = stock;
        req.publish = true;
        self.services.catalog.create_product(req, &self.admin().await).await.unwrap()
    }

    pub async fn mark_paid(&self, order_id: Uuid) -> Order {
        self.services.payments.confirm_payment(order_id, &format!("pi_{}", order_id.simple())).await.unwrap()
    }
}

/// Draft product request named after its sku.
pub fn create_product_request(sku: &str, price: i64) -> CreateProduct {
    CreateProduct {
        sku: Sku::new(sku).unwrap(),
        name: format!("Product {sku}"),
        description: String::new(),
        price: Decimal::new(price, 0),
        sale_price: None,
        cost: None,
        category_id: None,
        tags: vec![],
        images: vec![],
        featured: false,
        stock: 0,
        reorder_point: None,
        variants: vec![],
        publish: false,
    }
}

pub fn address() -> Address {
    Address {
        name: "Ada Lovelace".into(),
        street1: "12 Analytical Way".into(),
        street2: None,
        city: "London".into(),
        state: None,
        zip: "N1 9GU".into(),
        country: "GB".into(),
    }
}
