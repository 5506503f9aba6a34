//! Firestore access: the `DocumentStore` seam, its REST client and an
//! in-memory implementation.

pub mod client;
pub mod memory;
pub mod value;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

pub use client::FirestoreClient;
pub use memory::MemoryDocumentStore;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// First non-empty string among `keys`.
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get_str(k))
            .find(|s| !s.trim().is_empty())
    }

    /// Fields with the document id merged in under `id`.
    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(out)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Writes `fields` at `collection/id`. With `merge` only the given
    /// top-level fields are replaced; otherwise the whole document is.
    async fn set(&self, collection: &str, id: &str, fields: &Fields, merge: bool) -> Result<()>;

    /// Updates existing fields; fails with `NotFound` when the document is absent.
    async fn update(&self, collection: &str, id: &str, fields: &Fields) -> Result<()>;

    /// Creates a document with a generated id.
    async fn add(&self, collection: &str, fields: &Fields) -> Result<String>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Deletes every document, `batch_size` per commit. Returns the count.
    async fn delete_all(&self, collection: &str, batch_size: usize) -> Result<usize>;
}
