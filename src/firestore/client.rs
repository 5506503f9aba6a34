use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::value::{decode_fields, encode_fields, quote_field_path};
use super::{Document, DocumentStore, Fields};
use crate::error::{AdminError, Result};
use crate::google_auth::TokenProvider;
use crate::metrics;

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";
const LIST_PAGE_SIZE: usize = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RestDocument>,
    next_page_token: Option<String>,
}

impl From<RestDocument> for Document {
    fn from(doc: RestDocument) -> Self {
        let id = doc.name.rsplit('/').next().unwrap_or_default().to_string();
        Document::new(id, decode_fields(&doc.fields))
    }
}

/// Firestore REST client bound to one project's `(default)` database.
pub struct FirestoreClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    project_id: String,
    api_base: String,
}

impl FirestoreClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenProvider>, project_id: impl Into<String>) -> Self {
        Self {
            http,
            tokens,
            project_id: project_id.into(),
            api_base: FIRESTORE_API.to_string(),
        }
    }

    /// Points the client at another host, e.g. the Firestore emulator.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn database(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    fn resource_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database(), collection, id)
    }

    /// URL for `documents/<segments...>` with each segment percent-encoded.
    fn documents_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}/documents", self.api_base, self.database()))
            .map_err(|e| AdminError::Config(format!("invalid Firestore URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AdminError::Config("Firestore URL cannot be a base".to_string()))?
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn check(&self, response: Response, op: &'static str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        metrics::google::firestore_error(&self.project_id, op);
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(project = %self.project_id, op, status, "Firestore request failed");
        Err(AdminError::api(status, body))
    }

    async fn patch(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        mask: bool,
        must_exist: bool,
        op: &'static str,
    ) -> Result<()> {
        metrics::google::firestore_request(&self.project_id, op);
        let mut url = self.documents_url(&[collection, id])?;
        {
            let mut query = url.query_pairs_mut();
            if mask {
                for key in fields.keys() {
                    query.append_pair("updateMask.fieldPaths", &quote_field_path(key));
                }
            }
            if must_exist {
                query.append_pair("currentDocument.exists", "true");
            }
        }
        let response = self
            .request(Method::PATCH, url)
            .await?
            .json(&json!({ "fields": encode_fields(fields) }))
            .send()
            .await?;
        if must_exist && response.status() == StatusCode::NOT_FOUND {
            return Err(AdminError::NotFound(format!("{}/{}", collection, id)));
        }
        self.check(response, op).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        collection: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<ListResponse> {
        metrics::google::firestore_request(&self.project_id, "list");
        let mut url = self.documents_url(&[collection])?;
        url.query_pairs_mut()
            .append_pair("pageSize", &page_size.to_string());
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        let response = self.request(Method::GET, url).await?.send().await?;
        let response = self.check(response, "list").await?;
        Ok(response.json().await?)
    }

    async fn commit_deletes(&self, names: &[String]) -> Result<()> {
        metrics::google::firestore_request(&self.project_id, "commit");
        let url = Url::parse(&format!(
            "{}/{}/documents:commit",
            self.api_base,
            self.database()
        ))
        .map_err(|e| AdminError::Config(format!("invalid Firestore URL: {}", e)))?;
        let writes: Vec<Value> = names.iter().map(|n| json!({ "delete": n })).collect();
        let response = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "writes": writes }))
            .send()
            .await?;
        self.check(response, "commit").await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_page(collection, LIST_PAGE_SIZE, page_token.as_deref())
                .await?;
            documents.extend(page.documents.into_iter().map(Document::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(project = %self.project_id, collection, count = documents.len(), "Listed documents");
        Ok(documents)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        metrics::google::firestore_request(&self.project_id, "get");
        let url = self.documents_url(&[collection, id])?;
        let response = self.request(Method::GET, url).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response, "get").await?;
        let doc: RestDocument = response.json().await?;
        Ok(Some(doc.into()))
    }

    async fn set(&self, collection: &str, id: &str, fields: &Fields, merge: bool) -> Result<()> {
        self.patch(collection, id, fields, merge, false, "set").await
    }

    async fn update(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        self.patch(collection, id, fields, true, true, "update").await
    }

    async fn add(&self, collection: &str, fields: &Fields) -> Result<String> {
        metrics::google::firestore_request(&self.project_id, "add");
        let url = self.documents_url(&[collection])?;
        let response = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "fields": encode_fields(fields) }))
            .send()
            .await?;
        let response = self.check(response, "add").await?;
        let doc: RestDocument = response.json().await?;
        Ok(Document::from(doc).id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        metrics::google::firestore_request(&self.project_id, "delete");
        let url = self.documents_url(&[collection, id])?;
        let response = self.request(Method::DELETE, url).await?.send().await?;
        self.check(response, "delete").await?;
        Ok(())
    }

    async fn delete_all(&self, collection: &str, batch_size: usize) -> Result<usize> {
        let batch_size = batch_size.clamp(1, 500);
        let mut deleted = 0;
        loop {
            let page = self.list_page(collection, batch_size, None).await?;
            if page.documents.is_empty() {
                break;
            }
            let names: Vec<String> = page
                .documents
                .iter()
                .map(|d| {
                    let id = d.name.rsplit('/').next().unwrap_or_default();
                    self.resource_name(collection, id)
                })
                .collect();
            self.commit_deletes(&names).await?;
            deleted += names.len();
            debug!(collection, deleted, "Deleted batch");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_auth::StaticToken;

    fn client() -> FirestoreClient {
        FirestoreClient::new(
            Client::new(),
            Arc::new(StaticToken("t".to_string())),
            "butter-def",
        )
    }

    #[test]
    fn collection_names_with_spaces_are_encoded() {
        let url = client().documents_url(&["import logs", "abc"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/butter-def/databases/(default)/documents/import%20logs/abc"
        );
    }

    #[test]
    fn rest_document_id_is_last_path_segment() {
        let doc: RestDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/restaurants/CHEZ1",
            "fields": { "name": { "stringValue": "Chez" } }
        }))
        .unwrap();
        let doc = Document::from(doc);
        assert_eq!(doc.id, "CHEZ1");
        assert_eq!(doc.get_str("name"), Some("Chez"));
    }
}
