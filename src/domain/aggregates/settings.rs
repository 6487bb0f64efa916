//! Store-wide settings, kept as a single document.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;
use crate::store::{Collection, Document};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub id: Uuid,
    pub store_name: String,
    pub currency: String,
    /// Fraction, e.g. `0.075` for 7.5%.
    pub tax_rate: Decimal,
    pub flat_shipping: Decimal,
    pub free_shipping_threshold: Option<Decimal>,
    pub default_reorder_point: u32,
    pub support_email: Option<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub store_name: Option<String>,
    pub currency: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub flat_shipping: Option<Decimal>,
    pub free_shipping_threshold: Option<Decimal>,
    pub default_reorder_point: Option<u32>,
    pub support_email: Option<String>,
}

impl Document for Settings {
    const COLLECTION: Collection = Collection::Settings;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) { self.updated_at = Utc::now(); }
}

impl Settings {
    /// The singleton document id.
    pub const ID: Uuid = Uuid::nil();

    pub fn defaults(currency: &str) -> Self {
        Self {
            id: Self::ID, store_name: "Storefront".into(), currency: currency.to_uppercase(), tax_rate: Decimal::ZERO,
            flat_shipping: Decimal::ZERO, free_shipping_threshold: None, default_reorder_point: 5,
            support_email: None, updated_by: None, updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, update: SettingsUpdate, actor: Option<Uuid>) -> Result<(), String> {
        if let Some(name) = update.store_name { self.store_name = name; }
        if let Some(currency) = update.currency {
            if currency.len() != 3 { return Err("currency must be a 3-letter ISO code".into()); }
            self.currency = currency.to_uppercase();
        }
        if let Some(rate) = update.tax_rate {
            if rate.is_sign_negative() || rate >= Decimal::ONE { return Err("tax_rate must be a fraction in [0, 1)".into()); }
            self.tax_rate = rate;
        }
        if let Some(flat) = update.flat_shipping {
            if flat.is_sign_negative() { return Err("flat_shipping must not be negative".into()); }
            self.flat_shipping = flat;
        }
        if let Some(threshold) = update.free_shipping_threshold { self.free_shipping_threshold = Some(threshold); }
        if let Some(point) = update.default_reorder_point { self.default_reorder_point = point; }
        if let Some(email) = update.support_email { self.support_email = Some(email); }
        self.updated_by = actor;
        Ok(())
    }

    /// Shipping charged for an order with the given subtotal.
    pub fn shipping_for(&self, subtotal: &Money) -> Money {
        let free = self.free_shipping_threshold.is_some_and(|t| subtotal.amount() >= t);
        Money::new(if free { Decimal::ZERO } else { self.flat_shipping }, &self.currency)
    }
}
