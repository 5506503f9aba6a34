use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{Document, DocumentStore, Fields};
use crate::error::{AdminError, Result};

type Collections = HashMap<String, BTreeMap<String, Fields>>;

/// In-memory document store for development and tests.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
    failing_ids: Arc<Mutex<HashSet<String>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write to a document with this id fail.
    pub fn fail_writes_for(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn check_writable(&self, id: &str) -> Result<()> {
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(AdminError::api(500, format!("write rejected for {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn set(&self, collection: &str, id: &str, fields: &Fields, merge: bool) -> Result<()> {
        self.check_writable(id)?;
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.get_mut(id) {
            Some(existing) if merge => {
                for (k, v) in fields {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => {
                docs.insert(id.to_string(), fields.clone());
            }
        }
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        self.check_writable(id)?;
        let mut collections = self.collections.lock().unwrap();
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| AdminError::NotFound(format!("{}/{}", collection, id)))?;
        for (k, v) in fields {
            existing.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn add(&self, collection: &str, fields: &Fields) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.set(collection, &id, fields, false).await?;
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn delete_all(&self, collection: &str, _batch_size: usize) -> Result<usize> {
        let mut collections = self.collections.lock().unwrap();
        Ok(collections.remove(collection).map(|c| c.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn merge_keeps_untouched_fields() {
        let store = MemoryDocumentStore::new();
        store
            .set("restaurants", "A1", &fields(json!({"name": "A", "favorite_count": 3})), false)
            .await
            .unwrap();
        store
            .set("restaurants", "A1", &fields(json!({"name": "B"})), true)
            .await
            .unwrap();
        let doc = store.get("restaurants", "A1").await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("B"));
        assert_eq!(doc.fields["favorite_count"], json!(3));
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("restaurants", "nope", &fields(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_all_reports_count() {
        let store = MemoryDocumentStore::new();
        for id in ["a", "b", "c"] {
            store.set("c", id, &Fields::new(), false).await.unwrap();
        }
        assert_eq!(store.delete_all("c", 2).await.unwrap(), 3);
        assert_eq!(store.count("c"), 0);
    }
}
