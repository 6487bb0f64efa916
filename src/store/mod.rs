//! Document persistence
//!
//! Aggregates are stored whole, as JSON documents carrying a version number.
//! Writes go through [`DocumentStore::swap`], which only succeeds when the
//! stored version still matches the one that was read, so a guard checked
//! while mutating a loaded document (for example "enough stock left") holds
//! for the exact version that gets written.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{EcommerceError, Result};

/// Attempts made by [`Repository::update`] before giving up on a contended document.
pub const MAX_UPDATE_ATTEMPTS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Products,
    Orders,
    Carts,
    Tickets,
    Categories,
    Content,
    Settings,
    Media,
    AuditLogs,
    WebhookEvents,
}

impl Collection {
    pub const ALL: [Collection; 11] = [
        Self::Users, Self::Products, Self::Orders, Self::Carts, Self::Tickets, Self::Categories,
        Self::Content, Self::Settings, Self::Media, Self::AuditLogs, Self::WebhookEvents,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::Carts => "carts",
            Self::Tickets => "support_tickets",
            Self::Categories => "categories",
            Self::Content => "content",
            Self::Settings => "settings",
            Self::Media => "media",
            Self::AuditLogs => "audit_logs",
            Self::WebhookEvents => "webhook_events",
        }
    }

    /// Human readable entity name, used in "not found" errors.
    pub fn entity(&self) -> &'static str {
        match self {
            Self::Users => "User",
            Self::Products => "Product",
            Self::Orders => "Order",
            Self::Carts => "Cart",
            Self::Tickets => "Ticket",
            Self::Categories => "Category",
            Self::Content => "Content",
            Self::Settings => "Settings",
            Self::Media => "Media",
            Self::AuditLogs => "Audit log",
            Self::WebhookEvents => "Webhook event",
        }
    }

    /// Top-level document fields that must be unique within the collection.
    pub fn unique_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Users => &["email"],
            Self::Products => &["sku", "slug"],
            Self::Orders => &["order_number"],
            Self::Carts => &["customer_id"],
            Self::Categories | Self::Content => &["slug"],
            Self::WebhookEvents => &["event_id"],
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value for unique field `{0}`")]
    Duplicate(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A document together with the version it was read at.
#[derive(Clone, Debug)]
pub struct Stored {
    pub doc: Value,
    pub version: i64,
}

/// Pagination window; `page` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
    pub fn limit(&self) -> u64 { u64::from(self.per_page) }
}

impl Default for Page {
    fn default() -> Self { Self::new(None, None) }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
}

/// Containment filter (the document must contain `contains`) plus an optional
/// case-insensitive substring search over a set of top-level string fields.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub contains: Map<String, Value>,
    pub search: Option<Search>,
}

#[derive(Clone, Debug)]
pub struct Search {
    pub fields: &'static [&'static str],
    pub term: String,
}

impl Filter {
    pub fn new() -> Self { Self::default() }

    pub fn eq(mut self, field: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.contains.insert(field.to_string(), value);
        self
    }

    pub fn eq_opt<V: Serialize>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(field, v),
            None => self,
        }
    }

    pub fn search(mut self, fields: &'static [&'static str], term: Option<&str>) -> Self {
        if let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) {
            self.search = Some(Search { fields, term: term.to_string() });
        }
        self
    }

    pub fn as_json(&self) -> Value { Value::Object(self.contains.clone()) }

    /// Same semantics as Postgres `@>` for the containment part.
    pub fn matches(&self, doc: &Value) -> bool {
        if !json_contains(doc, &self.as_json()) {
            return false;
        }
        match &self.search {
            None => true,
            Some(search) => {
                let needle = search.term.to_lowercase();
                search.fields.iter().any(|field| {
                    doc.get(*field)
                        .and_then(Value::as_str)
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
                })
            }
        }
    }
}

/// JSON containment: every key of an object pattern must be contained in the
/// document, every element of an array pattern must be contained in some
/// element of the document array, scalars compare by equality.
pub fn json_contains(doc: &Value, pattern: &Value) -> bool {
    match (doc, pattern) {
        (Value::Object(d), Value::Object(p)) => {
            p.iter().all(|(k, pv)| d.get(k).is_some_and(|dv| json_contains(dv, pv)))
        }
        (Value::Array(d), Value::Array(p)) => p.iter().all(|pv| d.iter().any(|dv| json_contains(dv, pv))),
        (Value::Array(d), scalar) if !scalar.is_object() => d.iter().any(|dv| dv == scalar),
        (d, p) => d == p,
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<()>;
    async fn fetch(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Stored>>;
    async fn find_one(&self, collection: Collection, filter: &Filter) -> StoreResult<Option<Stored>>;
    /// Newest first, with the total number of matches.
    async fn find(&self, collection: Collection, filter: &Filter, page: Page) -> StoreResult<(Vec<Value>, u64)>;
    /// Replaces the document if its version is still `expected`. Returns false on a version mismatch.
    async fn swap(&self, collection: Collection, id: Uuid, expected: i64, doc: Value) -> StoreResult<bool>;
    async fn remove(&self, collection: Collection, id: Uuid) -> StoreResult<bool>;
}

/// A persisted aggregate.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> Uuid;

    /// Runs before every insert and update.
    fn before_save(&mut self) {}
}

/// Typed access to one collection.
pub struct Repository<T> {
    store: Arc<dyn DocumentStore>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self { Self { store: self.store.clone(), _doc: PhantomData } }
}

impl<T: Document> Repository<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self { Self { store, _doc: PhantomData } }

    pub async fn insert(&self, mut doc: T) -> Result<T> {
        doc.before_save();
        let value = serde_json::to_value(&doc).map_err(StoreError::from)?;
        self.store.insert(T::COLLECTION, doc.id(), value).await.map_err(duplicate_to_conflict::<T>)?;
        Ok(doc)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<T>> {
        match self.store.fetch(T::COLLECTION, id).await? {
            Some(stored) => Ok(Some(decode(stored.doc)?)),
            None => Ok(None),
        }
    }

    pub async fn require(&self, id: Uuid) -> Result<T> {
        self.get(id).await?.ok_or(EcommerceError::NotFound(T::COLLECTION.entity()))
    }

    pub async fn find_one(&self, filter: &Filter) -> Result<Option<T>> {
        match self.store.find_one(T::COLLECTION, filter).await? {
            Some(stored) => Ok(Some(decode(stored.doc)?)),
            None => Ok(None),
        }
    }

    pub async fn find(&self, filter: &Filter, page: Page) -> Result<PaginatedResponse<T>> {
        let (docs, total) = self.store.find(T::COLLECTION, filter, page).await?;
        let data = docs.into_iter().map(decode).collect::<StoreResult<Vec<T>>>()?;
        Ok(PaginatedResponse { data, total, page: page.page })
    }

    /// Every matching document, walking the pages.
    pub async fn find_all(&self, filter: &Filter) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut page = Page { page: 1, per_page: Page::MAX_PER_PAGE };
        loop {
            let batch = self.find(filter, page).await?;
            let fetched = batch.data.len();
            out.extend(batch.data);
            if fetched < page.per_page as usize || out.len() as u64 >= batch.total {
                return Ok(out);
            }
            page.page += 1;
        }
    }

    /// Loads the document, applies `f` and writes it back if nobody else wrote
    /// in between; otherwise reloads and reapplies. `f` may run several times
    /// and must only touch the document it is given.
    pub async fn update<R, F>(&self, id: Uuid, mut f: F) -> Result<(T, R)>
    where
        F: FnMut(&mut T) -> Result<R>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let stored = self
                .store
                .fetch(T::COLLECTION, id)
                .await?
                .ok_or(EcommerceError::NotFound(T::COLLECTION.entity()))?;
            let mut doc: T = decode(stored.doc)?;
            let out = f(&mut doc)?;
            doc.before_save();
            let value = serde_json::to_value(&doc).map_err(StoreError::from)?;
            if self
                .store
                .swap(T::COLLECTION, id, stored.version, value)
                .await
                .map_err(duplicate_to_conflict::<T>)?
            {
                return Ok((doc, out));
            }
            tracing::debug!(collection = T::COLLECTION.table(), %id, attempt, "version conflict, retrying");
        }
        tracing::warn!(collection = T::COLLECTION.table(), %id, "giving up after repeated version conflicts");
        Err(EcommerceError::ConcurrentModification)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.store.remove(T::COLLECTION, id).await?)
    }
}

fn decode<T: DeserializeOwned>(doc: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(doc)?)
}

fn duplicate_to_conflict<T: Document>(err: StoreError) -> EcommerceError {
    match err {
        StoreError::Duplicate(field) => {
            EcommerceError::Conflict(format!("{} with this {} already exists", T::COLLECTION.entity(), field))
        }
        other => other.into(),
    }
}
