//! Domain event fan-out: every event is logged, and published to NATS when connected.

use crate::domain::events::DomainEvent;

pub const SUBJECT_PREFIX: &str = "ecommerce";

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::default() };
        match async_nats::connect(url).await {
            Ok(client) => {
                tracing::info!(url, "connected to NATS");
                Self::new(Some(client))
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "NATS unavailable, events will only be logged");
                Self::default()
            }
        }
    }

    /// Publishing errors are logged, never returned.
    pub async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            let subject = format!("{SUBJECT_PREFIX}.{}", event.subject());
            tracing::info!(subject = %subject, ?event, "domain event");
            let Some(nats) = &self.nats else { continue };
            match serde_json::to_vec(&event) {
                Ok(payload) => {
                    if let Err(e) = nats.publish(subject.clone(), payload.into()).await {
                        tracing::error!(subject = %subject, error = %e, "failed to publish event");
                    }
                }
                Err(e) => tracing::error!(subject = %subject, error = %e, "failed to encode event"),
            }
        }
    }
}
