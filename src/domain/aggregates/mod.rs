//! Aggregates module
pub mod audit;
pub mod cart;
pub mod category;
pub mod content;
pub mod media;
pub mod order;
pub mod product;
pub mod settings;
pub mod support;
pub mod user;

pub use audit::{AuditLog, EntityKind, WebhookEvent};
pub use cart::{Cart, CartError, CartItem};
pub use category::{Category, CategoryNode};
pub use content::{Content, ContentBody, ContentKind, ContentStatus};
pub use media::Media;
pub use order::{Address, LineItem, Order, OrderError, OrderStatus, PaymentStatus, ReturnItem, ReturnStatus, StockState};
pub use product::{MovementContext, MovementKind, Product, ProductError, ProductStatus, ProductUpdate, StockAdjustment, Variant};
pub use settings::{Settings, SettingsUpdate};
pub use support::{SlaStatus, Ticket, TicketCategory, TicketError, TicketPriority, TicketStatus};
pub use user::{Role, User, UserProfile};
