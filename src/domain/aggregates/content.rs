//! Content Aggregate: banners, promotions, pages and FAQ entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::slugify;
use crate::store::{Collection, Document};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    /// Mirrors the body variant so listings can filter on it.
    pub kind: ContentKind,
    pub status: ContentStatus,
    pub body: ContentBody,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub sort_order: i32,
    pub author: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum ContentKind { Banner, Promotion, Page, Faq }
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum ContentStatus { #[default] Draft, Published, Archived }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBody {
    Banner { image_url: String, link_url: Option<String>, position: String },
    Promotion { code: String, discount_percent: Decimal, minimum_subtotal: Option<Decimal> },
    Page { body: String, meta_title: Option<String>, meta_description: Option<String> },
    Faq { question: String, answer: String, group: Option<String> },
}

impl ContentBody {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Banner { .. } => ContentKind::Banner,
            Self::Promotion { .. } => ContentKind::Promotion,
            Self::Page { .. } => ContentKind::Page,
            Self::Faq { .. } => ContentKind::Faq,
        }
    }

    /// Normalises and checks kind-specific fields.
    pub fn validate(&mut self) -> Result<(), String> {
        match self {
            Self::Banner { image_url, .. } if image_url.trim().is_empty() => Err("banner needs an image_url".into()),
            Self::Promotion { code, discount_percent, .. } => {
                *code = code.trim().to_uppercase();
                if code.is_empty() { return Err("promotion needs a code".into()); }
                if *discount_percent <= Decimal::ZERO || *discount_percent > Decimal::ONE_HUNDRED {
                    return Err("discount_percent must be within (0, 100]".into());
                }
                Ok(())
            }
            Self::Faq { question, answer, .. } if question.trim().is_empty() || answer.trim().is_empty() => {
                Err("faq needs a question and an answer".into())
            }
            _ => Ok(()),
        }
    }
}

impl Document for Content {
    const COLLECTION: Collection = Collection::Content;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) {
        self.kind = self.body.kind();
        self.updated_at = Utc::now();
    }
}

impl Content {
    pub fn new(title: impl Into<String>, slug: Option<&str>, body: ContentBody, author: Option<Uuid>) -> Self {
        let title = title.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), slug: slugify(slug.unwrap_or(&title)), title, kind: body.kind(), status: ContentStatus::Draft,
            body, starts_at: None, ends_at: None, sort_order: 0, author, published_at: None, created_at: now, updated_at: now,
        }
    }

    pub fn publish(&mut self) {
        self.status = ContentStatus::Published;
        self.published_at.get_or_insert_with(Utc::now);
    }

    /// Published and inside its schedule window.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ContentStatus::Published
            && self.starts_at.map_or(true, |s| s <= now)
            && self.ends_at.map_or(true, |e| e > now)
    }

    pub fn promotion_code(&self) -> Option<&str> {
        match &self.body {
            ContentBody::Promotion { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Discount granted by a live promotion on the given subtotal.
    pub fn promotion_discount(&self, subtotal: Decimal, now: DateTime<Utc>) -> Option<Decimal> {
        match &self.body {
            ContentBody::Promotion { discount_percent, minimum_subtotal, .. } if self.is_live(now) => {
                if minimum_subtotal.is_some_and(|min| subtotal < min) { return None; }
                Some((subtotal * discount_percent / Decimal::ONE_HUNDRED).round_dp(2))
            }
            _ => None,
        }
    }
}
