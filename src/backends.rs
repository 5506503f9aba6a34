//! Per-environment bundles of Google clients.
//!
//! Every operation resolves its clients through a `BackendProvider` with the
//! environment of the current session, so switching environment redirects
//! all reads and writes without restarting the process.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::environment::FirebaseEnv;
use crate::error::Result;
use crate::firestore::{DocumentStore, FirestoreClient, MemoryDocumentStore};
use crate::google_auth::{ServiceAccount, ServiceAccountTokens, TokenProvider};
use crate::notifications::{FcmClient, Messenger, RecordingMessenger};
use crate::storage::{BlobStore, GcsClient, MemoryBlobStore};
use crate::users::{AuthDirectory, IdentityToolkitClient, MemoryAuthDirectory};

pub struct EnvBackends {
    pub env: FirebaseEnv,
    pub project_id: String,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub messenger: Arc<dyn Messenger>,
    pub auth: Arc<dyn AuthDirectory>,
}

pub trait BackendProvider: Send + Sync {
    fn for_env(&self, env: FirebaseEnv) -> Result<Arc<EnvBackends>>;
}

/// Builds real clients from the environment's service account on first use.
pub struct GoogleBackends {
    config: Arc<Config>,
    http: reqwest::Client,
    dev: OnceCell<Arc<EnvBackends>>,
    prod: OnceCell<Arc<EnvBackends>>,
}

impl GoogleBackends {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            config,
            http,
            dev: OnceCell::new(),
            prod: OnceCell::new(),
        })
    }

    fn build(&self, env: FirebaseEnv) -> Result<Arc<EnvBackends>> {
        let path = self.config.service_account_path(env);
        let account = ServiceAccount::from_file(&path)?;
        let project_id = account.project_id.clone();
        let bucket = self.config.firebase.project(env).bucket.clone();
        info!(env = %env, project = %project_id, bucket = %bucket, "Initialising Firebase clients");

        let tokens: Arc<dyn TokenProvider> =
            Arc::new(ServiceAccountTokens::new(account, self.http.clone()));
        Ok(Arc::new(EnvBackends {
            env,
            project_id: project_id.clone(),
            documents: Arc::new(FirestoreClient::new(
                self.http.clone(),
                tokens.clone(),
                project_id.clone(),
            )),
            blobs: Arc::new(GcsClient::new(self.http.clone(), tokens.clone(), bucket)),
            messenger: Arc::new(FcmClient::new(
                self.http.clone(),
                tokens.clone(),
                project_id.clone(),
            )),
            auth: Arc::new(IdentityToolkitClient::new(self.http.clone(), tokens, project_id)),
        }))
    }
}

impl BackendProvider for GoogleBackends {
    fn for_env(&self, env: FirebaseEnv) -> Result<Arc<EnvBackends>> {
        let cell = match env {
            FirebaseEnv::Dev => &self.dev,
            FirebaseEnv::Prod => &self.prod,
        };
        cell.get_or_try_init(|| self.build(env)).cloned()
    }
}

/// One independent in-memory project per environment.
pub struct MemoryBackends {
    dev: MemoryProject,
    prod: MemoryProject,
}

#[derive(Clone)]
pub struct MemoryProject {
    pub documents: MemoryDocumentStore,
    pub blobs: MemoryBlobStore,
    pub messenger: RecordingMessenger,
    pub auth: MemoryAuthDirectory,
    backends: Arc<EnvBackends>,
}

impl MemoryProject {
    fn new(env: FirebaseEnv) -> Self {
        let documents = MemoryDocumentStore::new();
        let blobs = MemoryBlobStore::new(format!("memory-{}.appspot.com", env));
        let messenger = RecordingMessenger::default();
        let auth = MemoryAuthDirectory::default();
        let backends = Arc::new(EnvBackends {
            env,
            project_id: format!("memory-{}", env),
            documents: Arc::new(documents.clone()),
            blobs: Arc::new(blobs.clone()),
            messenger: Arc::new(messenger.clone()),
            auth: Arc::new(auth.clone()),
        });
        Self {
            documents,
            blobs,
            messenger,
            auth,
            backends,
        }
    }
}

impl MemoryBackends {
    pub fn new() -> Self {
        Self {
            dev: MemoryProject::new(FirebaseEnv::Dev),
            prod: MemoryProject::new(FirebaseEnv::Prod),
        }
    }

    pub fn project(&self, env: FirebaseEnv) -> &MemoryProject {
        match env {
            FirebaseEnv::Dev => &self.dev,
            FirebaseEnv::Prod => &self.prod,
        }
    }
}

impl Default for MemoryBackends {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendProvider for MemoryBackends {
    fn for_env(&self, env: FirebaseEnv) -> Result<Arc<EnvBackends>> {
        Ok(self.project(env).backends.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdminError;
    use serde_json::json;

    #[tokio::test]
    async fn memory_environments_are_isolated() {
        let backends = MemoryBackends::new();
        let dev = backends.for_env(FirebaseEnv::Dev).unwrap();
        let fields = json!({"name": "A"}).as_object().unwrap().clone();
        dev.documents.set("restaurants", "A1", &fields, false).await.unwrap();

        let prod = backends.for_env(FirebaseEnv::Prod).unwrap();
        assert!(prod.documents.get("restaurants", "A1").await.unwrap().is_none());
        assert_eq!(backends.project(FirebaseEnv::Dev).documents.count("restaurants"), 1);
    }

    #[test]
    fn missing_service_account_surfaces_as_error() {
        let mut config = Config::default();
        config.firebase.credentials_dir = "/nonexistent".into();
        let backends = GoogleBackends::new(Arc::new(config)).unwrap();
        let err = backends.for_env(FirebaseEnv::Dev).err().unwrap();
        assert!(matches!(err, AdminError::MissingCredentials(_)));
    }
}
