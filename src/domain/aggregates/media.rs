//! Media records. Files live elsewhere (CDN, object storage); only metadata is kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::store::{Collection, Document};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: Uuid,
    pub filename: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub alt_text: Option<String>,
    pub folder: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Media {
    const COLLECTION: Collection = Collection::Media;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) { self.updated_at = Utc::now(); }
}

impl Media {
    pub fn is_image(&self) -> bool { self.mime_type.starts_with("image/") }
}
