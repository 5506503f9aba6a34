use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

use crate::config::RevenueCatConfig;
use crate::error::{AdminError, Result};
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewMetric {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Deserialize)]
struct OverviewResponse {
    #[serde(default)]
    metrics: Vec<OverviewMetric>,
}

#[async_trait]
pub trait SubscriberApi: Send + Sync {
    /// V1 subscriber document, `None` when RevenueCat has no such user.
    async fn subscriber(&self, app_user_id: &str) -> Result<Option<Value>>;

    /// V2 overview metrics keyed by id; `None` when V2 is not configured or
    /// unavailable.
    async fn overview(&self) -> Result<Option<HashMap<String, OverviewMetric>>>;
}

pub struct RevenueCatClient {
    http: Client,
    config: RevenueCatConfig,
}

impl RevenueCatClient {
    pub fn new(config: RevenueCatConfig) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl SubscriberApi for RevenueCatClient {
    async fn subscriber(&self, app_user_id: &str) -> Result<Option<Value>> {
        if self.config.api_key_v1.is_empty() {
            return Err(AdminError::Config("REVENUECAT_API_KEY is not set".to_string()));
        }
        metrics::revenuecat::request("v1");
        let url = format!("{}/{}", self.config.v1_url, app_user_id);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_key_v1)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Ok(None);
        }
        let mut body: Value = response.json().await?;
        Ok(body.get_mut("subscriber").map(Value::take))
    }

    async fn overview(&self) -> Result<Option<HashMap<String, OverviewMetric>>> {
        if self.config.api_key_v2.is_empty() {
            warn!("REVENUECAT_API_KEY_V2 is not set, using stored statuses");
            return Ok(None);
        }
        metrics::revenuecat::request("v2");
        let url = format!(
            "{}/projects/{}/metrics/overview",
            self.config.v2_url, self.config.project_id
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_key_v2)
            .send()
            .await?;
        if !response.status().is_success() {
            error!(status = response.status().as_u16(), "RevenueCat overview request failed");
            return Ok(None);
        }
        let overview: OverviewResponse = response.json().await?;
        Ok(Some(
            overview
                .metrics
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect(),
        ))
    }
}

/// Canned subscribers keyed by app user id.
#[derive(Clone, Default)]
pub struct MemorySubscriberApi {
    subscribers: Arc<Mutex<HashMap<String, Value>>>,
    overview: Arc<Mutex<Option<HashMap<String, OverviewMetric>>>>,
}

impl MemorySubscriberApi {
    pub fn insert(&self, app_user_id: &str, subscriber: Value) {
        self.subscribers
            .lock()
            .unwrap()
            .insert(app_user_id.to_string(), subscriber);
    }

    pub fn set_overview(&self, metrics: Vec<OverviewMetric>) {
        *self.overview.lock().unwrap() =
            Some(metrics.into_iter().map(|m| (m.id.clone(), m)).collect());
    }
}

#[async_trait]
impl SubscriberApi for MemorySubscriberApi {
    async fn subscriber(&self, app_user_id: &str) -> Result<Option<Value>> {
        Ok(self.subscribers.lock().unwrap().get(app_user_id).cloned())
    }

    async fn overview(&self) -> Result<Option<HashMap<String, OverviewMetric>>> {
        Ok(self.overview.lock().unwrap().clone())
    }
}
