//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Money, Sku};
use crate::store::{Collection, Document};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    id: Uuid,
    customer_id: Uuid,
    items: Vec<CartItem>,
    subtotal: Money,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub variant_sku: Option<Sku>,
    pub name: String,
    pub sku: Sku,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
    fn is(&self, product_id: Uuid, variant_sku: Option<&Sku>) -> bool { self.product_id == product_id && self.variant_sku.as_ref() == variant_sku }
}

impl Document for Cart {
    const COLLECTION: Collection = Collection::Carts;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) { self.recalculate(); }
}

impl Cart {
    pub fn for_customer(customer_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), customer_id, items: vec![], subtotal: Money::zero(currency),
            currency: currency.to_uppercase(), created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn customer_id(&self) -> Uuid { self.customer_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn quantity_of(&self, product_id: Uuid, variant_sku: Option<&Sku>) -> u32 {
        self.items.iter().filter(|i| i.is(product_id, variant_sku)).map(|i| i.quantity).sum()
    }

    /// Adds an item, merging it with an existing line for the same product and variant.
    /// The line price is refreshed to the latest unit price.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity); }
        if item.unit_price.currency() != self.currency { return Err(CartError::CurrencyMismatch); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.is(item.product_id, item.variant_sku.as_ref())) {
            existing.quantity = existing.quantity.checked_add(item.quantity).ok_or(CartError::InvalidQuantity)?;
            existing.unit_price = item.unit_price;
        } else {
            self.items.push(item);
        }
        self.recalculate();
        Ok(())
    }

    pub fn update_quantity(&mut self, product_id: Uuid, variant_sku: Option<&Sku>, quantity: u32) -> Result<(), CartError> {
        let item = self.items.iter_mut().find(|i| i.is(product_id, variant_sku)).ok_or(CartError::ItemNotFound)?;
        if quantity == 0 { self.items.retain(|i| !i.is(product_id, variant_sku)); }
        else { item.quantity = quantity; }
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid, variant_sku: Option<&Sku>) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.is(product_id, variant_sku));
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.recalculate();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.recalculate(); }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()).unwrap_or(acc));
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Item not found")]
    ItemNotFound,
    #[error("Invalid quantity")]
    InvalidQuantity,
    #[error("Cart is empty")]
    Empty,
    #[error("Currency does not match the cart currency")]
    CurrencyMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn widget(product_id: Uuid, quantity: u32) -> CartItem {
        CartItem { product_id, variant_sku: None, name: "Widget".into(), sku: Sku::new("W1").unwrap(), quantity, unit_price: Money::usd(Decimal::new(10, 0)) }
    }

    #[test]
    fn test_cart_operations() {
        let product = Uuid::new_v4();
        let mut cart = Cart::for_customer(Uuid::new_v4(), "USD");
        cart.add_item(widget(product, 2)).unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.subtotal().amount(), Decimal::new(20, 0));
        cart.add_item(widget(product, 1)).unwrap();
        assert_eq!(cart.items()[0].quantity, 3); // Merged
    }

    #[test]
    fn test_variants_are_separate_lines() {
        let product = Uuid::new_v4();
        let mut cart = Cart::for_customer(Uuid::new_v4(), "USD");
        cart.add_item(widget(product, 1)).unwrap();
        let mut large = widget(product, 1);
        large.variant_sku = Some(Sku::new("W1-L").unwrap());
        cart.add_item(large).unwrap();
        assert_eq!(cart.item_count(), 2);
        cart.update_quantity(product, None, 0).unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.remove_item(product, None), Err(CartError::ItemNotFound));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut cart = Cart::for_customer(Uuid::new_v4(), "USD");
        assert_eq!(cart.add_item(widget(Uuid::new_v4(), 0)), Err(CartError::InvalidQuantity));
    }
}
