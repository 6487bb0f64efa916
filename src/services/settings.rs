use serde_json::json;

use crate::domain::aggregates::{EntityKind, Settings, SettingsUpdate};
use crate::services::{AuditService, AuthUser};
use crate::store::Repository;
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct SettingsService {
    settings: Repository<Settings>,
    audit: AuditService,
    default_currency: String,
}

impl SettingsService {
    pub fn new(settings: Repository<Settings>, audit: AuditService, default_currency: String) -> Self {
        Self { settings, audit, default_currency }
    }

    /// The stored settings, or defaults when nothing was saved yet.
    pub async fn get(&self) -> Result<Settings> {
        Ok(self.settings.get(Settings::ID).await?.unwrap_or_else(|| Settings::defaults(&self.default_currency)))
    }

    pub async fn update(&self, update: SettingsUpdate, actor: &AuthUser) -> Result<Settings> {
        if self.settings.get(Settings::ID).await?.is_none() {
            match self.settings.insert(Settings::defaults(&self.default_currency)).await {
                Ok(_) | Err(EcommerceError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let details = json!({
            "currency": update.currency, "tax_rate": update.tax_rate, "flat_shipping": update.flat_shipping,
            "free_shipping_threshold": update.free_shipping_threshold,
        });
        let (settings, _) = self
            .settings
            .update(Settings::ID, |s| s.apply(update.clone(), Some(actor.id)).map_err(EcommerceError::Validation))
            .await?;
        self.audit.record(Some(actor.id), "settings.updated", EntityKind::Settings, Some(Settings::ID), details).await;
        Ok(settings)
    }
}
