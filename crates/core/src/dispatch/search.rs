//! Search index sync for published pages.
//!
//! Only the sync contract lives here: a denormalized record per published
//! page, keyed by `{siteSlug}:{path}`. Ranking and querying belong to
//! whatever reads the `search_documents` table.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::content::key::SearchKey;
use crate::content::model::{Page, Site};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    pub key: String,
    pub site_id: Uuid,
    pub page_id: Uuid,
    pub path: String,
    pub title: String,
    pub meta: Value,
    pub published_at: Option<DateTime<Utc>>,
}

impl SearchDocument {
    /// Build the record for a published page. A `title` in the page metadata wins
    /// over the page's own title.
    pub fn from_page(site: &Site, page: &Page) -> Self {
        let title = page
            .meta
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(&page.title)
            .to_string();
        Self {
            key: SearchKey::new(&site.slug, &page.path).full_key(),
            site_id: site.id,
            page_id: page.id,
            path: page.path.clone(),
            title,
            meta: page.meta.clone(),
            published_at: page.published_at,
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), StoreError>;

    async fn remove(&self, key: &SearchKey) -> Result<(), StoreError>;
}

/// Index backed by the `search_documents` table.
#[derive(Debug, Clone)]
pub struct PgSearchIndex {
    pool: PgPool,
}

impl PgSearchIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchIndex for PgSearchIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO search_documents (key, site_id, page_id, path, title, meta, published_at, indexed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
             ON CONFLICT (key) DO UPDATE SET
                page_id = EXCLUDED.page_id,
                title = EXCLUDED.title,
                meta = EXCLUDED.meta,
                published_at = EXCLUDED.published_at,
                indexed_at = NOW()",
        )
        .bind(&document.key)
        .bind(document.site_id)
        .bind(document.page_id)
        .bind(&document.path)
        .bind(&document.title)
        .bind(&document.meta)
        .bind(document.published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &SearchKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM search_documents WHERE key = $1")
            .bind(key.full_key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-process index for tests and single-node development.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    documents: RwLock<HashMap<String, SearchDocument>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<SearchDocument> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), StoreError> {
        self.documents
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(document.key.clone(), document.clone());
        Ok(())
    }

    async fn remove(&self, key: &SearchKey) -> Result<(), StoreError> {
        self.documents
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(&key.full_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::content::model::PageStatus;

    fn site() -> Site {
        Site {
            id: Uuid::new_v4(),
            slug: "marketing".to_string(),
            name: "Marketing".to_string(),
            timezone: "UTC".to_string(),
        }
    }

    fn page(site: &Site, meta: Value) -> Page {
        Page {
            id: Uuid::new_v4(),
            site_id: site.id,
            path: "/pricing".to_string(),
            title: "Pricing".to_string(),
            status: PageStatus::Published,
            published_at: Some(Utc::now()),
            meta,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn document_prefers_meta_title() {
        let site = site();
        let doc = SearchDocument::from_page(&site, &page(&site, json!({ "title": "Plans & Pricing" })));
        assert_eq!(doc.key, "marketing:/pricing");
        assert_eq!(doc.title, "Plans & Pricing");
    }

    #[test]
    fn document_falls_back_to_page_title() {
        let site = site();
        let doc = SearchDocument::from_page(&site, &page(&site, json!({})));
        assert_eq!(doc.title, "Pricing");
    }

    #[tokio::test]
    async fn memory_index_upserts_and_removes() {
        let site = site();
        let index = MemorySearchIndex::new();
        let doc = SearchDocument::from_page(&site, &page(&site, json!({})));

        index.upsert(&doc).await.unwrap();
        index.upsert(&doc).await.unwrap();
        assert_eq!(index.len(), 1);

        index
            .remove(&SearchKey::new("marketing", "/pricing"))
            .await
            .unwrap();
        assert!(index.is_empty());
    }
}
