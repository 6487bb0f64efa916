use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{EntityKind, Media};
use crate::services::{AuditService, AuthUser};
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateMedia {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 3))]
    pub mime_type: String,
    pub size_bytes: u64,
    pub alt_text: Option<String>,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMedia {
    pub alt_text: Option<String>,
    pub folder: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaQuery {
    pub folder: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub images_only: bool,
}

#[derive(Clone)]
pub struct MediaService {
    media: Repository<Media>,
    audit: AuditService,
}

impl MediaService {
    pub fn new(media: Repository<Media>, audit: AuditService) -> Self { Self { media, audit } }

    pub async fn create(&self, req: CreateMedia, actor: &AuthUser) -> Result<Media> {
        req.validate()?;
        let now = Utc::now();
        let media = Media {
            id: Uuid::new_v4(), filename: req.filename, url: req.url, mime_type: req.mime_type.to_lowercase(),
            size_bytes: req.size_bytes, alt_text: req.alt_text, folder: req.folder, uploaded_by: Some(actor.id),
            created_at: now, updated_at: now,
        };
        let media = self.media.insert(media).await?;
        self.audit.record(Some(actor.id), "media.created", EntityKind::Media, Some(media.id), json!({ "url": media.url })).await;
        Ok(media)
    }

    pub async fn update(&self, id: Uuid, req: UpdateMedia, actor: &AuthUser) -> Result<Media> {
        let (media, _) = self
            .media
            .update(id, |m| {
                if let Some(filename) = &req.filename {
                    if filename.trim().is_empty() { return Err(EcommerceError::Validation("filename is required".into())); }
                    m.filename = filename.clone();
                }
                if req.alt_text.is_some() { m.alt_text = req.alt_text.clone(); }
                if req.folder.is_some() { m.folder = req.folder.clone(); }
                Ok(())
            })
            .await?;
        self.audit.record(Some(actor.id), "media.updated", EntityKind::Media, Some(id), json!({})).await;
        Ok(media)
    }

    pub async fn delete(&self, id: Uuid, actor: &AuthUser) -> Result<()> {
        if !self.media.delete(id).await? {
            return Err(EcommerceError::NotFound("Media"));
        }
        self.audit.record(Some(actor.id), "media.deleted", EntityKind::Media, Some(id), json!({})).await;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Media> { self.media.require(id).await }

    pub async fn list(&self, query: MediaQuery, page: Page) -> Result<PaginatedResponse<Media>> {
        let filter = Filter::new().eq_opt("folder", query.folder).search(&["filename", "alt_text"], query.search.as_deref());
        if !query.images_only {
            return self.media.find(&filter, page).await;
        }
        // MIME prefixes are not expressible as containment; narrow in memory.
        let images: Vec<Media> = self.media.find_all(&filter).await?.into_iter().filter(Media::is_image).collect();
        let total = images.len() as u64;
        let data = images.into_iter().skip(page.offset() as usize).take(page.limit() as usize).collect();
        Ok(PaginatedResponse { data, total, page: page.page })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestApp;

    fn upload(name: &str, mime: &str) -> CreateMedia {
        CreateMedia {
            filename: name.into(),
            url: format!("https://cdn.example.com/{name}"),
            mime_type: mime.into(),
            size_bytes: 1024,
            alt_text: None,
            folder: Some("products".into()),
        }
    }

    #[tokio::test]
    async fn test_images_only_listing() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let media = &app.services.media;
        media.create(upload("hoodie.jpg", "image/jpeg"), &admin).await.unwrap();
        media.create(upload("sizes.pdf", "application/pdf"), &admin).await.unwrap();

        let all = media.list(MediaQuery::default(), Page::default()).await.unwrap();
        assert_eq!(all.total, 2);
        let images = media.list(MediaQuery { images_only: true, ..Default::default() }, Page::default()).await.unwrap();
        assert_eq!(images.total, 1);
        assert_eq!(images.data[0].filename, "hoodie.jpg");
    }

    #[tokio::test]
    async fn test_rejects_invalid_url() {
        let app = TestApp::new().await;
        let admin = app.admin().await;
        let mut bad = upload("x.png", "image/png");
        bad.url = "not a url".into();
        assert!(matches!(app.services.media.create(bad, &admin).await, Err(EcommerceError::Validation(_))));
    }
}
