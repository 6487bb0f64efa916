//! Carts: per-user line items priced from the catalog when added, and checkout
//! into an order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Address, Cart, CartError, CartItem, Order, Product, ProductError};
use crate::domain::value_objects::Sku;
use crate::services::order::{CreateOrder, OrderLine};
use crate::services::{AuthUser, OrderService, SettingsService};
use crate::store::{Filter, Repository};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct AddToCart {
    pub product_id: Uuid,
    pub variant_sku: Option<Sku>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCartItem {
    pub variant_sku: Option<Sku>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Checkout {
    pub email: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<String>,
    pub promo_code: Option<String>,
    pub notes: Option<String>,
}

/// Cart as returned to the shopper.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub item_count: usize,
    pub total_quantity: u32,
}

impl From<Cart> for CartView {
    fn from(cart: Cart) -> Self {
        let total_quantity = cart.items().iter().map(|i| i.quantity).sum();
        Self { item_count: cart.item_count(), total_quantity, cart }
    }
}

#[derive(Clone)]
pub struct CartService {
    carts: Repository<Cart>,
    products: Repository<Product>,
    orders: OrderService,
    settings: SettingsService,
}

impl CartService {
    pub fn new(carts: Repository<Cart>, products: Repository<Product>, orders: OrderService, settings: SettingsService) -> Self {
        Self { carts, products, orders, settings }
    }

    pub async fn get(&self, customer: &AuthUser) -> Result<Cart> {
        match self.find(customer.id).await? {
            Some(cart) => Ok(cart),
            None => {
                let settings = self.settings.get().await?;
                Ok(Cart::for_customer(customer.id, &settings.currency))
            }
        }
    }

    /// Adds an item at the current catalog price. Only available stock can be
    /// put in the cart; nothing is reserved until checkout.
    pub async fn add_item(&self, customer: &AuthUser, req: AddToCart) -> Result<Cart> {
        if req.quantity == 0 {
            return Err(CartError::InvalidQuantity.into());
        }
        let product = self.products.get(req.product_id).await?.filter(Product::is_active).ok_or(EcommerceError::NotFound("Product"))?;
        let variant = req.variant_sku.as_ref();
        let unit_price = product.unit_price(variant)?;
        let name = match variant {
            Some(sku) => format!("{} ({})", product.name(), product.variant(sku)?.title()),
            None => product.name().to_string(),
        };
        let item = CartItem {
            product_id: product.id(),
            variant_sku: req.variant_sku.clone(),
            name,
            sku: req.variant_sku.clone().unwrap_or_else(|| product.sku().clone()),
            quantity: req.quantity,
            unit_price,
        };
        let available = product.available_stock(variant)?;

        let cart_id = self.ensure_cart(customer).await?;
        let (cart, _) = self
            .carts
            .update(cart_id, |cart| {
                let wanted = cart.quantity_of(item.product_id, item.variant_sku.as_ref()).saturating_add(item.quantity);
                if wanted > available {
                    return Err(ProductError::InsufficientInventory { sku: item.sku.to_string(), requested: wanted, available }.into());
                }
                cart.add_item(item.clone()).map_err(Into::into)
            })
            .await?;
        Ok(cart)
    }

    /// Sets a line's quantity; zero removes the line.
    pub async fn update_item(&self, customer: &AuthUser, product_id: Uuid, req: UpdateCartItem) -> Result<Cart> {
        let cart = self.find(customer.id).await?.ok_or(CartError::ItemNotFound)?;
        if req.quantity > 0 {
            let product = self.products.require(product_id).await?;
            let available = product.available_stock(req.variant_sku.as_ref())?;
            if req.quantity > available {
                let sku = req.variant_sku.clone().unwrap_or_else(|| product.sku().clone());
                return Err(ProductError::InsufficientInventory { sku: sku.to_string(), requested: req.quantity, available }.into());
            }
        }
        let (cart, _) = self
            .carts
            .update(cart.id(), |cart| cart.update_quantity(product_id, req.variant_sku.as_ref(), req.quantity).map_err(Into::into))
            .await?;
        Ok(cart)
    }

    pub async fn remove_item(&self, customer: &AuthUser, product_id: Uuid, variant_sku: Option<Sku>) -> Result<Cart> {
        let cart = self.find(customer.id).await?.ok_or(CartError::ItemNotFound)?;
        let (cart, _) = self
            .carts
            .update(cart.id(), |cart| cart.remove_item(product_id, variant_sku.as_ref()).map_err(Into::into))
            .await?;
        Ok(cart)
    }

    pub async fn clear(&self, customer: &AuthUser) -> Result<Cart> {
        match self.find(customer.id).await? {
            Some(cart) => Ok(self.carts.update(cart.id(), |cart| { cart.clear(); Ok(()) }).await?.0),
            None => self.get(customer).await,
        }
    }

    /// Places an order for the cart's contents and empties the cart.
    pub async fn checkout(&self, customer: &AuthUser, req: Checkout) -> Result<Order> {
        let cart = self.find(customer.id).await?.filter(|c| !c.is_empty()).ok_or(CartError::Empty)?;
        let order = self
            .orders
            .create(
                customer,
                CreateOrder {
                    items: cart
                        .items()
                        .iter()
                        .map(|i| OrderLine { product_id: i.product_id, variant_sku: i.variant_sku.clone(), quantity: i.quantity })
                        .collect(),
                    email: req.email,
                    shipping_address: req.shipping_address,
                    billing_address: req.billing_address,
                    shipping_method: req.shipping_method,
                    promo_code: req.promo_code,
                    notes: req.notes,
                },
            )
            .await?;
        if let Err(e) = self.carts.update(cart.id(), |cart| { cart.clear(); Ok(()) }).await {
            tracing::warn!(cart_id = %cart.id(), order_id = %order.id(), error = %e, "order placed but cart was not cleared");
        }
        Ok(order)
    }

    async fn find(&self, customer_id: Uuid) -> Result<Option<Cart>> {
        self.carts.find_one(&Filter::new().eq("customer_id", customer_id)).await
    }

    async fn ensure_cart(&self, customer: &AuthUser) -> Result<Uuid> {
        if let Some(cart) = self.find(customer.id).await? {
            return Ok(cart.id());
        }
        let settings = self.settings.get().await?;
        match self.carts.insert(Cart::for_customer(customer.id, &settings.currency)).await {
            Ok(cart) => Ok(cart.id()),
            // Another request created it first.
            Err(EcommerceError::Conflict(_)) => self.find(customer.id).await?.map(|c| c.id()).ok_or(EcommerceError::NotFound("Cart")),
            Err(e) => Err(e),
        }
    }
}
