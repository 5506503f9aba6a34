use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{BlobInfo, BlobStore};
use crate::error::{AdminError, Result};

/// In-memory bucket for development and tests.
#[derive(Clone)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Arc<Mutex<BTreeMap<String, (BlobInfo, Vec<u8>)>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, (info, _))| info.clone())
            .collect())
    }

    async fn metadata(&self, name: &str) -> Result<Option<BlobInfo>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(name)
            .map(|(info, _)| info.clone()))
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| AdminError::NotFound(name.to_string()))
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobInfo> {
        let now = Utc::now();
        let mut objects = self.objects.lock().unwrap();
        let time_created = objects
            .get(name)
            .and_then(|(info, _)| info.time_created)
            .unwrap_or(now);
        let info = BlobInfo {
            name: name.to_string(),
            size: bytes.len() as u64,
            content_type: Some(content_type.to_string()),
            time_created: Some(time_created),
            updated: Some(now),
            download_token: Some(Uuid::new_v4().to_string()),
        };
        objects.insert(name.to_string(), (info.clone(), bytes));
        Ok(info)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AdminError::NotFound(name.to_string()))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<BlobInfo> {
        let mut objects = self.objects.lock().unwrap();
        let (info, bytes) = objects
            .get(from)
            .cloned()
            .ok_or_else(|| AdminError::NotFound(from.to_string()))?;
        let copied = BlobInfo {
            name: to.to_string(),
            updated: Some(Utc::now()),
            ..info
        };
        objects.insert(to.to_string(), (copied.clone(), bytes));
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = MemoryBlobStore::new("bkt");
        store.upload("Logos/a.png", vec![1], "image/png").await.unwrap();
        store.upload("Photos restaurants/a1.webp", vec![1, 2], "image/webp").await.unwrap();
        let logos = store.list("Logos/").await.unwrap();
        assert_eq!(logos.len(), 1);
        assert_eq!(logos[0].name, "Logos/a.png");
    }

    #[tokio::test]
    async fn copy_then_delete_renames() {
        let store = MemoryBlobStore::new("bkt");
        store.upload("Logos/a.png", vec![7], "image/png").await.unwrap();
        store.copy("Logos/a.png", "Logos/b.png").await.unwrap();
        store.delete("Logos/a.png").await.unwrap();
        assert!(!store.exists("Logos/a.png").await.unwrap());
        assert_eq!(store.download("Logos/b.png").await.unwrap(), vec![7]);
    }
}
