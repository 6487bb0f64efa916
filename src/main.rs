//! Storefront - Self-hosted Commerce API

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront::api::{self, AppState};
use storefront::config::Config;
use storefront::events::EventPublisher;
use storefront::services::Services;
use storefront::store::{DocumentStore, MemoryStore, PgStore};
use storefront::stripe::{PaymentGateway, StripeGateway};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(config.database_max_connections).connect(url).await?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            tracing::info!("connected to PostgreSQL");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let events = EventPublisher::connect(config.nats_url.as_deref()).await;
    let gateway = config.stripe.as_ref().map(|stripe| Arc::new(StripeGateway::new(stripe)) as Arc<dyn PaymentGateway>);
    if gateway.is_none() {
        tracing::warn!("Stripe is not configured; payment endpoints are disabled");
    }

    let services = Services::new(&config, store, events, gateway);
    if let Some(admin) = &config.admin {
        services.auth.ensure_admin(admin).await?;
    }

    let app = api::router(AppState { services }).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 Storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
