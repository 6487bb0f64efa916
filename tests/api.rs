//! HTTP-level tests: the full router over the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use storefront::api::{self, AppState};
use storefront::config::{AdminBootstrap, Config};
use storefront::events::EventPublisher;
use storefront::services::Services;
use storefront::store::{DocumentStore, MemoryStore};
use storefront::stripe::{verify_webhook_signature, IntentRequest, PaymentGateway, PaymentIntent};
use storefront::{EcommerceError, Result};

const WEBHOOK_SECRET: &str = "whsec_api_test";
const ADMIN_EMAIL: &str = "admin@shop.test";
const ADMIN_PASSWORD: &str = "admin-password";

#[derive(Default)]
struct StubGateway {
    intents: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_customer(&self, _email: &str, user_id: Uuid) -> Result<String> {
        Ok(format!("cus_{}", user_id.simple()))
    }

    async fn create_payment_intent(&self, request: IntentRequest<'_>) -> Result<PaymentIntent> {
        let n = self.intents.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent { id: format!("pi_api_{n}"), client_secret: format!("pi_api_{n}_secret_{}", request.amount_minor) })
    }

    async fn refund(&self, intent_id: &str, _amount_minor: i64) -> Result<String> {
        Ok(format!("re_{intent_id}"))
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_webhook_signature(payload, signature_header, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
            .map_err(|e| EcommerceError::Validation(e.to_string()))
    }
}

async fn app() -> Router {
    let config = Config {
        port: 0,
        database_url: None,
        database_max_connections: 1,
        jwt_secret: "api-test-secret-0123456789".into(),
        jwt_expiry_hours: 1,
        stripe: None,
        nats_url: None,
        admin: Some(AdminBootstrap { email: ADMIN_EMAIL.into(), password: ADMIN_PASSWORD.into() }),
        default_currency: "USD".into(),
    };
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let gateway: Arc<dyn PaymentGateway> = Arc::new(StubGateway::default());
    let services = Services::new(&config, store, EventPublisher::default(), Some(gateway));
    services.auth.ensure_admin(config.admin.as_ref().unwrap()).await.unwrap();
    api::router(AppState { services })
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    read(app.clone().oneshot(request).await.unwrap()).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

async fn register(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": email, "password": "correct-horse", "name": "Shopper" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["token"].as_str().unwrap().to_string()
}

async fn admin_token(app: &Router) -> String {
    let (status, body) =
        send(app, Method::POST, "/api/v1/auth/login", None, Some(json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["token"].as_str().unwrap().to_string()
}

/// An active product with `stock` units, created through the admin API.
async fn create_product(app: &Router, admin: &str, sku: &str, stock: u32) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/admin/products",
        Some(admin),
        Some(json!({ "sku": sku, "name": format!("Mug {sku}"), "price": "12.50", "stock": stock, "publish": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn place_order(app: &Router, token: &str, product_id: &str, quantity: u32) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/orders",
        Some(token),
        Some(json!({
            "items": [{ "product_id": product_id, "quantity": quantity }],
            "shipping_address": {
                "name": "Grace Hopper", "street1": "1 Compiler Rd", "city": "Arlington", "zip": "22201", "country": "US"
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn inventory(app: &Router, product_id: &str) -> (u64, u64) {
    let (status, body) = send(app, Method::GET, &format!("/api/v1/products/{product_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    (body["inventory"]["quantity"].as_u64().unwrap(), body["inventory"]["reserved"].as_u64().unwrap())
}

fn sign(payload: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

async fn post_webhook(app: &Router, payload: &str, signature: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("stripe-signature", signature)
        .body(Body::from(payload.to_string()))
        .unwrap();
    read(app.clone().oneshot(request).await.unwrap()).await
}

#[tokio::test]
async fn health_check() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn duplicate_registration_is_rejected_without_creating_a_user() {
    let app = app().await;
    register(&app, "dup@shop.test").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": "DUP@shop.test", "password": "another-pass", "name": "Again" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "User already exists");

    let admin = admin_token(&app).await;
    let (status, users) = send(&app, Method::GET, "/api/v1/admin/users?search=dup@", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users["total"], 1);
}

#[tokio::test]
async fn admin_routes_require_staff() {
    let app = app().await;
    let customer = register(&app, "nosy@shop.test").await;

    let (status, body) = send(&app, Method::GET, "/api/v1/admin/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, Method::GET, "/api/v1/admin/orders", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::GET, "/api/v1/orders", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_requests_get_the_error_body() {
    let app = app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = read(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let (status, body) = send(&app, Method::POST, "/api/v1/auth/login", None, Some(json!({ "email": "a@shop.test" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = send(&app, Method::GET, "/api/v1/products/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = send(&app, Method::GET, "/api/v1/products?page=first", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn account_changes_apply_to_issued_tokens() {
    let app = app().await;
    let admin = admin_token(&app).await;
    let token = register(&app, "later-staff@shop.test").await;
    let (_, me) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    let user_id = me["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, Method::GET, "/api/v1/admin/orders", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, Method::PUT, &format!("/api/v1/admin/users/{user_id}/role"), Some(&admin), Some(json!({ "role": "staff" }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, "/api/v1/admin/orders", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        send(&app, Method::PUT, &format!("/api/v1/admin/users/{user_id}/active"), Some(&admin), Some(json!({ "active": false }))).await;
    assert_eq!(status, StatusCode::OK);
    for uri in ["/api/v1/auth/me", "/api/v1/orders", "/api/v1/admin/orders"] {
        let (status, body) = send(&app, Method::GET, uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn cancelling_an_order_restores_stock() {
    let app = app().await;
    let admin = admin_token(&app).await;
    let customer = register(&app, "buyer@shop.test").await;
    let product_id = create_product(&app, &admin, "MUG-1", 5).await;

    let order = place_order(&app, &customer, &product_id, 2).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(inventory(&app, &product_id).await, (5, 2));

    let order_id = order["id"].as_str().unwrap();
    let (status, cancelled) = send(&app, Method::POST, &format!("/api/v1/orders/{order_id}/cancel"), Some(&customer), None).await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(inventory(&app, &product_id).await, (5, 0));

    let (status, _) = send(&app, Method::POST, &format!("/api/v1/orders/{order_id}/cancel"), Some(&customer), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ordering_more_than_available_conflicts() {
    let app = app().await;
    let admin = admin_token(&app).await;
    let customer = register(&app, "greedy@shop.test").await;
    let product_id = create_product(&app, &admin, "MUG-2", 1).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/orders",
        Some(&customer),
        Some(json!({
            "items": [{ "product_id": product_id, "quantity": 3 }],
            "shipping_address": { "name": "G", "street1": "1 Rd", "city": "X", "zip": "1", "country": "US" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(inventory(&app, &product_id).await, (1, 0));
}

#[tokio::test]
async fn other_customers_orders_are_not_found() {
    let app = app().await;
    let admin = admin_token(&app).await;
    let owner = register(&app, "owner@shop.test").await;
    let stranger = register(&app, "stranger@shop.test").await;
    let product_id = create_product(&app, &admin, "MUG-3", 5).await;
    let order = place_order(&app, &owner, &product_id, 1).await;
    let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());

    let (status, _) = send(&app, Method::GET, &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn payment_webhook_marks_order_paid_once() {
    let app = app().await;
    let admin = admin_token(&app).await;
    let customer = register(&app, "payer@shop.test").await;
    let product_id = create_product(&app, &admin, "MUG-4", 5).await;
    let order = place_order(&app, &customer, &product_id, 2).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, intent) =
        send(&app, Method::POST, "/api/v1/payments/intent", Some(&customer), Some(json!({ "order_id": order_id }))).await;
    assert_eq!(status, StatusCode::OK, "{intent}");
    assert_eq!(intent["amount"], 2500);
    let intent_id = intent["payment_intent_id"].as_str().unwrap();

    let payload = json!({
        "id": "evt_paid_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": intent_id, "metadata": { "order_id": order_id } } }
    })
    .to_string();

    let (status, body) = post_webhook(&app, &payload, &sign(&payload)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"], "processed");

    let (_, body) = post_webhook(&app, &payload, &sign(&payload)).await;
    assert_eq!(body["outcome"], "duplicate");

    let (status, paid) = send(&app, Method::GET, &format!("/api/v1/orders/{order_id}"), Some(&customer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "confirmed");
    assert_eq!(paid["payment"]["status"], "paid");
    assert_eq!(inventory(&app, &product_id).await, (3, 0));
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = app().await;
    let payload = r#"{"id":"evt_x","type":"payment_intent.succeeded","data":{"object":{}}}"#;
    let (status, body) = post_webhook(&app, payload, "t=1,v1=deadbeef").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let request = Request::builder().method(Method::POST).uri("/api/v1/payments/webhook").body(Body::from(payload)).unwrap();
    let (status, _) = read(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cart_checkout_places_an_order() {
    let app = app().await;
    let admin = admin_token(&app).await;
    let customer = register(&app, "cart@shop.test").await;
    let product_id = create_product(&app, &admin, "MUG-5", 4).await;

    let (status, cart) =
        send(&app, Method::POST, "/api/v1/cart/items", Some(&customer), Some(json!({ "product_id": product_id, "quantity": 2 }))).await;
    assert_eq!(status, StatusCode::OK, "{cart}");
    assert_eq!(cart["total_quantity"], 2);

    let (status, order) = send(
        &app,
        Method::POST,
        "/api/v1/checkout",
        Some(&customer),
        Some(json!({ "shipping_address": { "name": "C", "street1": "2 Rd", "city": "Y", "zip": "2", "country": "US" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["items"][0]["quantity"], 2);

    let (_, cart) = send(&app, Method::GET, "/api/v1/cart", Some(&customer), None).await;
    assert_eq!(cart["item_count"], 0);
}
