//! Storefront content: banners, promotions, static pages and FAQ entries.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::aggregates::{Content, ContentBody, ContentKind, ContentStatus, EntityKind};
use crate::domain::value_objects::slugify;
use crate::services::{AuditService, AuthUser};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContent {
    pub title: String,
    pub slug: Option<String>,
    pub body: ContentBody,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateContent {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub body: Option<ContentBody>,
    pub status: Option<ContentStatus>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentQuery {
    pub kind: Option<ContentKind>,
    pub status: Option<ContentStatus>,
    pub search: Option<String>,
}

#[derive(Clone)]
pub struct ContentService {
    content: Repository<Content>,
    audit: AuditService,
}

impl ContentService {
    pub fn new(content: Repository<Content>, audit: AuditService) -> Self { Self { content, audit } }

    pub async fn create(&self, req: CreateContent, actor: &AuthUser) -> Result<Content> {
        let mut body = req.body;
        body.validate().map_err(EcommerceError::Validation)?;
        if req.title.trim().is_empty() {
            return Err(EcommerceError::Validation("title is required".into()));
        }
        let mut content = Content::new(req.title.trim(), req.slug.as_deref(), body, Some(actor.id));
        if content.slug.is_empty() {
            return Err(EcommerceError::Validation("slug must contain letters or digits".into()));
        }
        content.starts_at = req.starts_at;
        content.ends_at = req.ends_at;
        content.sort_order = req.sort_order;
        check_window(&content)?;
        if req.publish {
            content.publish();
        }
        self.ensure_unique_code(&content).await?;
        let content = self.content.insert(content).await?;
        self.audit
            .record(Some(actor.id), "content.created", EntityKind::Content, Some(content.id), json!({ "kind": content.kind, "slug": content.slug }))
            .await;
        Ok(content)
    }

    pub async fn update(&self, id: Uuid, req: UpdateContent, actor: &AuthUser) -> Result<Content> {
        let mut body = req.body.clone();
        if let Some(body) = body.as_mut() {
            body.validate().map_err(EcommerceError::Validation)?;
        }
        let (content, _) = self
            .content
            .update(id, |c| {
                if let Some(title) = &req.title {
                    if title.trim().is_empty() { return Err(EcommerceError::Validation("title is required".into())); }
                    c.title = title.trim().to_string();
                }
                if let Some(slug) = &req.slug {
                    let slug = slugify(slug);
                    if slug.is_empty() { return Err(EcommerceError::Validation("slug must contain letters or digits".into())); }
                    c.slug = slug;
                }
                if let Some(body) = &body { c.body = body.clone(); }
                if let Some(starts_at) = req.starts_at { c.starts_at = Some(starts_at); }
                if let Some(ends_at) = req.ends_at { c.ends_at = Some(ends_at); }
                if let Some(sort_order) = req.sort_order { c.sort_order = sort_order; }
                match req.status {
                    Some(ContentStatus::Published) => c.publish(),
                    Some(status) => c.status = status,
                    None => {}
                }
                check_window(c)
            })
            .await?;
        self.ensure_unique_code(&content).await?;
        self.audit.record(Some(actor.id), "content.updated", EntityKind::Content, Some(id), json!({ "status": content.status })).await;
        Ok(content)
    }

    pub async fn delete(&self, id: Uuid, actor: &AuthUser) -> Result<()> {
        if !self.content.delete(id).await? {
            return Err(EcommerceError::NotFound("Content"));
        }
        self.audit.record(Some(actor.id), "content.deleted", EntityKind::Content, Some(id), json!({})).await;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Content> { self.content.require(id).await }

    /// Published, in-window content by slug.
    pub async fn live_by_slug(&self, slug: &str) -> Result<Content> {
        self.content
            .find_one(&Filter::new().eq("slug", slug))
            .await?
            .filter(|c| c.is_live(Utc::now()))
            .ok_or(EcommerceError::NotFound("Content"))
    }

    pub async fn list(&self, query: ContentQuery, page: Page) -> Result<PaginatedResponse<Content>> {
        let filter = Filter::new()
            .eq_opt("kind", query.kind)
            .eq_opt("status", query.status)
            .search(&["title", "slug"], query.search.as_deref());
        self.content.find(&filter, page).await
    }

    /// Everything currently live, optionally of one kind, ordered by `sort_order`.
    pub async fn live(&self, kind: Option<ContentKind>) -> Result<Vec<Content>> {
        let now = Utc::now();
        let filter = Filter::new().eq("status", ContentStatus::Published).eq_opt("kind", kind);
        let mut live: Vec<Content> = self.content.find_all(&filter).await?.into_iter().filter(|c| c.is_live(now)).collect();
        live.sort_by_key(|c| c.sort_order);
        Ok(live)
    }

    /// The live promotion carrying `code`, if any.
    pub async fn find_promotion(&self, code: &str) -> Result<Option<Content>> {
        let code = code.trim().to_uppercase();
        let filter = Filter::new().eq("kind", ContentKind::Promotion).eq("body", json!({ "code": code }));
        let now = Utc::now();
        Ok(self.content.find_all(&filter).await?.into_iter().find(|c| c.is_live(now)))
    }

    async fn ensure_unique_code(&self, content: &Content) -> Result<()> {
        let Some(code) = content.promotion_code() else { return Ok(()) };
        let filter = Filter::new().eq("kind", ContentKind::Promotion).eq("body", json!({ "code": code }));
        let clash = self.content.find_all(&filter).await?.into_iter().any(|c| c.id != content.id);
        if clash {
            return Err(EcommerceError::Conflict(format!("Promotion code {code} is already in use")));
        }
        Ok(())
    }
}

fn check_window(content: &Content) -> Result<()> {
    match (content.starts_at, content.ends_at) {
        (Some(start), Some(end)) if end <= start => Err(EcommerceError::Validation("ends_at must be after starts_at".into())),
        _ => Ok(()),
    }
}
