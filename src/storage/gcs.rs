use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BlobInfo, BlobStore};
use crate::error::{AdminError, Result};
use crate::google_auth::TokenProvider;
use crate::metrics;

const STORAGE_API: &str = "https://storage.googleapis.com";
const TOKEN_METADATA_KEY: &str = "firebaseStorageDownloadTokens";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    content_type: Option<String>,
    time_created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<GcsObject> for BlobInfo {
    fn from(obj: GcsObject) -> Self {
        // Several comma separated tokens may exist; any of them works.
        let download_token = obj
            .metadata
            .get(TOKEN_METADATA_KEY)
            .and_then(|t| t.split(',').next())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        BlobInfo {
            name: obj.name,
            size: obj.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            content_type: obj.content_type,
            time_created: obj.time_created,
            updated: obj.updated,
            download_token,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjects {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

/// Cloud Storage JSON API client bound to one bucket.
pub struct GcsClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    bucket: String,
    api_base: String,
}

impl GcsClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenProvider>, bucket: impl Into<String>) -> Self {
        Self {
            http,
            tokens,
            bucket: bucket.into(),
            api_base: STORAGE_API.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn url(&self, root: &str, object: Option<&str>, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| AdminError::Config(format!("invalid storage URL: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AdminError::Config("storage URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            for part in root.split('/') {
                segments.push(part);
            }
            segments.push("b").push(&self.bucket).push("o");
            if let Some(object) = object {
                segments.push(object);
            }
            segments.extend(tail);
        }
        Ok(url)
    }

    fn object_url(&self, name: &str) -> Result<Url> {
        self.url("storage/v1", Some(name), &[])
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn check(&self, response: Response, op: &'static str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(bucket = %self.bucket, op, status, "Storage request failed");
        Err(AdminError::api(status, body))
    }
}

#[async_trait]
impl BlobStore for GcsClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>> {
        let mut blobs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            metrics::google::storage_request(&self.bucket, "list");
            let mut url = self.url("storage/v1", None, &[])?;
            url.query_pairs_mut().append_pair("prefix", prefix);
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let response = self.request(Method::GET, url).await?.send().await?;
            let page: ListObjects = self.check(response, "list").await?.json().await?;
            blobs.extend(page.items.into_iter().map(BlobInfo::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(bucket = %self.bucket, prefix, count = blobs.len(), "Listed objects");
        Ok(blobs)
    }

    async fn metadata(&self, name: &str) -> Result<Option<BlobInfo>> {
        metrics::google::storage_request(&self.bucket, "metadata");
        let response = self
            .request(Method::GET, self.object_url(name)?)
            .await?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let obj: GcsObject = self.check(response, "metadata").await?.json().await?;
        Ok(Some(obj.into()))
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        metrics::google::storage_request(&self.bucket, "download");
        let mut url = self.object_url(name)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self.request(Method::GET, url).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AdminError::NotFound(name.to_string()));
        }
        let bytes = self.check(response, "download").await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobInfo> {
        metrics::google::storage_request(&self.bucket, "upload");
        let mut url = self.url("upload/storage/v1", None, &[])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", name);
        let response = self
            .request(Method::POST, url)
            .await?
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        self.check(response, "upload").await?;

        // Attach a download token so the object is reachable through the
        // Firebase download endpoint.
        let token = Uuid::new_v4().to_string();
        let response = self
            .request(Method::PATCH, self.object_url(name)?)
            .await?
            .json(&json!({ "metadata": { TOKEN_METADATA_KEY: token } }))
            .send()
            .await?;
        let obj: GcsObject = self.check(response, "upload").await?.json().await?;
        debug!(bucket = %self.bucket, name, "Uploaded object");
        Ok(obj.into())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        metrics::google::storage_request(&self.bucket, "delete");
        let response = self
            .request(Method::DELETE, self.object_url(name)?)
            .await?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AdminError::NotFound(name.to_string()));
        }
        self.check(response, "delete").await?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<BlobInfo> {
        metrics::google::storage_request(&self.bucket, "copy");
        let url = self.url(
            "storage/v1",
            Some(from),
            &["copyTo", "b", self.bucket.as_str(), "o", to],
        )?;
        let response = self.request(Method::POST, url).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AdminError::NotFound(from.to_string()));
        }
        let obj: GcsObject = self.check(response, "copy").await?.json().await?;
        Ok(obj.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_auth::StaticToken;

    fn client() -> GcsClient {
        GcsClient::new(
            Client::new(),
            Arc::new(StaticToken("t".to_string())),
            "butter-def.firebasestorage.app",
        )
    }

    #[test]
    fn object_names_are_single_encoded_segments() {
        let url = client().object_url("Photos restaurants/A1.webp").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/butter-def.firebasestorage.app/o/Photos%20restaurants%2FA1.webp"
        );
    }

    #[test]
    fn copy_url_targets_same_bucket() {
        let url = client()
            .url("storage/v1", Some("Logos/a.png"), &["copyTo", "b", "bkt", "o", "Logos/b.png"])
            .unwrap();
        assert!(url.path().ends_with("/o/Logos%2Fa.png/copyTo/b/bkt/o/Logos%2Fb.png"));
    }

    #[test]
    fn object_metadata_maps_to_blob_info() {
        let obj: GcsObject = serde_json::from_value(json!({
            "name": "Logos/A1.png",
            "size": "2048",
            "contentType": "image/png",
            "timeCreated": "2025-03-01T10:00:00.000Z",
            "metadata": { "firebaseStorageDownloadTokens": "tok1,tok2" }
        }))
        .unwrap();
        let blob = BlobInfo::from(obj);
        assert_eq!(blob.size, 2048);
        assert_eq!(blob.download_token.as_deref(), Some("tok1"));
        assert!(blob.time_created.is_some());
    }
}
