//! Object storage for restaurant photos, logos and menus.

pub mod gcs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub use gcs::GcsClient;
pub use memory::MemoryBlobStore;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlobInfo {
    /// Full object path, folder prefix included.
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub download_token: Option<String>,
}

impl BlobInfo {
    /// Object name without its folder prefix.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn extension(&self) -> Option<String> {
        let file = self.file_name();
        file.rfind('.')
            .map(|i| file[i + 1..].to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>>;

    async fn metadata(&self, name: &str) -> Result<Option<BlobInfo>>;

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.metadata(name).await?.is_some())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>>;

    /// Uploads or overwrites `name`. The stored object gets a download token.
    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobInfo>;

    async fn delete(&self, name: &str) -> Result<()>;

    async fn copy(&self, from: &str, to: &str) -> Result<BlobInfo>;

    /// Public URL for the object, tokenised when a download token exists.
    fn download_url(&self, blob: &BlobInfo) -> String {
        firebase_download_url(self.bucket(), blob)
    }
}

pub fn firebase_download_url(bucket: &str, blob: &BlobInfo) -> String {
    let mut url = match reqwest::Url::parse("https://firebasestorage.googleapis.com/v0/b/") {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(bucket).push("o").push(&blob.name);
    }
    url.query_pairs_mut().append_pair("alt", "media");
    if let Some(token) = &blob.download_token {
        url.query_pairs_mut().append_pair("token", token);
    }
    url.to_string()
}
