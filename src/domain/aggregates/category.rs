//! Category Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::slugify;
use crate::store::{Collection, Document};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A category with its descendants, for navigation menus.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl Document for Category {
    const COLLECTION: Collection = Collection::Categories;
    fn id(&self) -> Uuid { self.id }
    fn before_save(&mut self) { self.updated_at = Utc::now(); }
}

impl Category {
    pub fn new(name: impl Into<String>, description: Option<String>, parent_id: Option<Uuid>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), slug: slugify(&name), name, description, parent_id, image_url: None,
            active: true, sort_order: 0, created_at: now, updated_at: now,
        }
    }
}

/// Nests categories under their parents. Categories whose parent is missing
/// are treated as roots; siblings are ordered by `sort_order`, then name.
pub fn build_tree(categories: Vec<Category>) -> Vec<CategoryNode> {
    fn children_of(parent: Option<Uuid>, all: &[Category]) -> Vec<CategoryNode> {
        let mut nodes: Vec<CategoryNode> = all
            .iter()
            .filter(|c| c.parent_id == parent && Some(c.id) != parent)
            .map(|c| CategoryNode { category: c.clone(), children: children_of(Some(c.id), all) })
            .collect();
        nodes.sort_by(|a, b| (a.category.sort_order, &a.category.name).cmp(&(b.category.sort_order, &b.category.name)));
        nodes
    }

    let ids: Vec<Uuid> = categories.iter().map(|c| c.id).collect();
    let roots: Vec<Category> = categories
        .iter()
        .filter(|c| c.parent_id.map_or(true, |p| !ids.contains(&p) || p == c.id))
        .cloned()
        .collect();
    let mut tree: Vec<CategoryNode> = roots
        .into_iter()
        .map(|c| CategoryNode { children: children_of(Some(c.id), &categories), category: c })
        .collect();
    tree.sort_by(|a, b| (a.category.sort_order, &a.category.name).cmp(&(b.category.sort_order, &b.category.name)));
    tree
}

/// True when making `parent` the parent of `id` would create a cycle.
pub fn creates_cycle(id: Uuid, parent: Uuid, all: &[Category]) -> bool {
    let mut cursor = Some(parent);
    let mut hops = 0;
    while let Some(current) = cursor {
        if current == id { return true; }
        hops += 1;
        if hops > all.len() { return true; }
        cursor = all.iter().find(|c| c.id == current).and_then(|c| c.parent_id);
    }
    false
}
