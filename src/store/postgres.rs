//! PostgreSQL document store: one table per collection, `doc JSONB` plus a version column.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Collection, DocumentStore, Filter, Page, StoreError, StoreResult, Stored};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps unique-index violations to [`StoreError::Duplicate`]. Index names follow
/// `<table>_<field>_key`, so the field is recovered from the constraint name.
fn map_err(collection: Collection, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let field = db
                .constraint()
                .and_then(|c| c.strip_prefix(collection.table()))
                .and_then(|c| c.strip_prefix('_'))
                .and_then(|c| c.strip_suffix("_key"))
                .unwrap_or("id");
            return StoreError::Duplicate(field.to_string());
        }
    }
    StoreError::Database(err)
}

/// `WHERE` clause shared by `find` and `find_one`. `$1` is the containment
/// document, `$2` the optional `ILIKE` pattern. Searchable field names are
/// compile-time constants, never user input.
fn where_clause(filter: &Filter) -> String {
    let search = match &filter.search {
        Some(search) if !search.fields.is_empty() => search
            .fields
            .iter()
            .map(|f| format!("doc->>'{f}' ILIKE $2"))
            .collect::<Vec<_>>()
            .join(" OR "),
        _ => "TRUE".to_string(),
    };
    format!("doc @> $1 AND ($2::text IS NULL OR {search})")
}

fn search_pattern(filter: &Filter) -> Option<String> {
    filter.search.as_ref().map(|s| {
        let escaped = s.term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("%{escaped}%")
    })
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn insert(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<()> {
        let sql = format!("INSERT INTO {} (id, doc, version, created_at, updated_at) VALUES ($1, $2, 1, NOW(), NOW())", collection.table());
        sqlx::query(&sql).bind(id).bind(doc).execute(&self.pool).await.map_err(|e| map_err(collection, e))?;
        Ok(())
    }

    async fn fetch(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Stored>> {
        let sql = format!("SELECT doc, version FROM {} WHERE id = $1", collection.table());
        let row: Option<(Value, i64)> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(doc, version)| Stored { doc, version }))
    }

    async fn find_one(&self, collection: Collection, filter: &Filter) -> StoreResult<Option<Stored>> {
        let sql = format!(
            "SELECT doc, version FROM {} WHERE {} ORDER BY created_at DESC LIMIT 1",
            collection.table(),
            where_clause(filter)
        );
        let row: Option<(Value, i64)> = sqlx::query_as(&sql)
            .bind(filter.as_json())
            .bind(search_pattern(filter))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(doc, version)| Stored { doc, version }))
    }

    async fn find(&self, collection: Collection, filter: &Filter, page: Page) -> StoreResult<(Vec<Value>, u64)> {
        let clause = where_clause(filter);
        let sql = format!(
            "SELECT doc FROM {} WHERE {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            collection.table(),
            clause
        );
        let docs: Vec<(Value,)> = sqlx::query_as(&sql)
            .bind(filter.as_json())
            .bind(search_pattern(filter))
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let count_sql = format!("SELECT COUNT(*) FROM {} WHERE {}", collection.table(), clause);
        let total: (i64,) = sqlx::query_as(&count_sql)
            .bind(filter.as_json())
            .bind(search_pattern(filter))
            .fetch_one(&self.pool)
            .await?;
        Ok((docs.into_iter().map(|(d,)| d).collect(), total.0.max(0) as u64))
    }

    async fn swap(&self, collection: Collection, id: Uuid, expected: i64, doc: Value) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE {} SET doc = $3, version = version + 1, updated_at = NOW() WHERE id = $1 AND version = $2",
            collection.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(expected)
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err(collection, e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", collection.table());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
