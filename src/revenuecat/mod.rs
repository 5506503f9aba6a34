//! RevenueCat subscriptions: dashboard metrics, per-user statuses and the
//! background scan that refreshes them.
//!
//! The mobile app registers `SHA-256(phone)` as the RevenueCat app user id,
//! so every lookup starts from a phone number.

pub mod client;
pub mod status;
pub mod store;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::backends::EnvBackends;
use crate::config::RevenueCatConfig;
use crate::environment::FirebaseEnv;
use crate::error::Result;
use crate::users::{self, USERS_COLLECTION};

pub use client::{MemorySubscriberApi, OverviewMetric, RevenueCatClient, SubscriberApi};
pub use status::{parse_subscriber_status, SubscriberStatus, SubscriptionStatus};
pub use store::{RevenueCatStore, StoredStatus};

pub fn phone_to_rc_id(phone: &str) -> String {
    hex::encode(Sha256::digest(phone.as_bytes()))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardMetrics {
    pub active_trials: f64,
    pub active_subscriptions: f64,
    pub mrr: f64,
    pub revenue_28_days: f64,
    pub new_customers_28_days: f64,
    pub active_customers: f64,
    pub transactions_28_days: f64,
    /// `revenuecat_v2` or `database_scan`.
    pub source: &'static str,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ScanProgress {
    pub current: usize,
    pub total: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `idle`, `loading_users`, `scanning`, `completed` or `error: <reason>`.
    pub status: String,
    pub found_active: usize,
    pub found_total: usize,
    pub is_running: bool,
}

/// A user to look up in RevenueCat.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTarget {
    pub uid: String,
    pub phone: String,
}

/// Outcome of a single-user refresh.
#[derive(Debug, Clone)]
pub enum UserRefresh {
    NoPhone,
    NotFound,
    Updated(SubscriberStatus),
}

pub struct RevenueCatService {
    api: Arc<dyn SubscriberApi>,
    store: Arc<RevenueCatStore>,
    config: RevenueCatConfig,
    dashboard: Cache<FirebaseEnv, Arc<DashboardMetrics>>,
    running: AtomicBool,
    progress: Mutex<ScanProgress>,
}

impl RevenueCatService {
    pub fn new(
        api: Arc<dyn SubscriberApi>,
        store: Arc<RevenueCatStore>,
        config: RevenueCatConfig,
    ) -> Self {
        let dashboard = Cache::builder()
            .time_to_live(Duration::from_secs(config.dashboard_cache_ttl_secs))
            .build();
        Self {
            api,
            store,
            config,
            dashboard,
            running: AtomicBool::new(false),
            progress: Mutex::new(ScanProgress {
                status: "idle".to_string(),
                ..ScanProgress::default()
            }),
        }
    }

    pub fn store(&self) -> &RevenueCatStore {
        &self.store
    }

    /// V2 overview when available, else counts derived from stored statuses.
    pub async fn dashboard_metrics(&self, env: FirebaseEnv) -> Result<Arc<DashboardMetrics>> {
        if let Some(cached) = self.dashboard.get(&env).await {
            return Ok(cached);
        }
        let now = Utc::now();
        let overview = match self.api.overview().await {
            Ok(overview) => overview,
            Err(e) => {
                error!("RevenueCat overview failed: {}", e);
                None
            }
        };
        let metrics = match overview {
            Some(v2) => {
                let value = |id: &str| v2.get(id).map(|m| m.value).unwrap_or(0.0);
                DashboardMetrics {
                    active_trials: value("active_trials"),
                    active_subscriptions: value("active_subscriptions"),
                    mrr: value("mrr"),
                    revenue_28_days: value("revenue"),
                    new_customers_28_days: value("new_customers"),
                    active_customers: value("active_users"),
                    transactions_28_days: value("num_tx_last_28_days"),
                    source: "revenuecat_v2",
                    last_updated: now,
                }
            }
            None => {
                info!(env = %env, "RevenueCat V2 unavailable, computing from stored statuses");
                let counts = self.store.active_counts(env, now)?;
                DashboardMetrics {
                    active_trials: counts.active_trials as f64,
                    active_subscriptions: counts.active_subscriptions as f64,
                    mrr: 0.0,
                    revenue_28_days: 0.0,
                    new_customers_28_days: 0.0,
                    active_customers: counts.active_customers as f64,
                    transactions_28_days: 0.0,
                    source: "database_scan",
                    last_updated: now,
                }
            }
        };
        let metrics = Arc::new(metrics);
        self.dashboard.insert(env, metrics.clone()).await;
        Ok(metrics)
    }

    /// Progress is plain counters, so a poisoned lock still holds usable data.
    fn progress_guard(&self) -> MutexGuard<'_, ScanProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self) -> ScanProgress {
        let mut progress = self.progress_guard().clone();
        progress.is_running = self.is_running();
        progress
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn update_progress(&self, f: impl FnOnce(&mut ScanProgress)) {
        f(&mut self.progress_guard());
    }

    /// Starts a scan in the background. Returns false if one is already running.
    pub fn start_scan(self: &Arc<Self>, backends: Arc<EnvBackends>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let service = self.clone();
        tokio::spawn(async move {
            service.scan_locked(&backends).await;
        });
        true
    }

    /// Runs a scan to completion in the current task.
    pub async fn run_scan(&self, backends: &EnvBackends) -> ScanProgress {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("RevenueCat scan already running");
            return self.progress();
        }
        self.scan_locked(backends).await;
        self.progress()
    }

    async fn scan_locked(&self, backends: &EnvBackends) {
        self.update_progress(|p| {
            *p = ScanProgress {
                started_at: Some(Utc::now()),
                status: "loading_users".to_string(),
                ..ScanProgress::default()
            }
        });
        if let Err(e) = self.scan(backends).await {
            error!(env = %backends.env, "RevenueCat scan failed: {}", e);
            self.update_progress(|p| p.status = format!("error: {}", e));
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn scan(&self, backends: &EnvBackends) -> Result<()> {
        let targets = scan_targets(backends).await?;
        let total = targets.len();
        info!(env = %backends.env, total, "RevenueCat scan started");
        self.update_progress(|p| {
            p.total = total;
            p.status = "scanning".to_string();
        });

        let batch_size = self.config.batch_size.max(1);
        let mut found_active = 0;
        let mut found_total = 0;
        for (index, batch) in targets.chunks(batch_size).enumerate() {
            for target in batch {
                let rc_id = phone_to_rc_id(&target.phone);
                let subscriber = match self.api.subscriber(&rc_id).await {
                    Ok(Some(subscriber)) => subscriber,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(uid = %target.uid, "RevenueCat lookup failed: {}", e);
                        continue;
                    }
                };
                let has_data = ["subscriptions", "entitlements"].iter().any(|k| {
                    subscriber
                        .get(*k)
                        .and_then(|v| v.as_object())
                        .is_some_and(|o| !o.is_empty())
                });
                if !has_data {
                    continue;
                }
                let now = Utc::now();
                let status = parse_subscriber_status(&subscriber, now);
                self.store.save(
                    backends.env,
                    &target.uid,
                    &target.phone,
                    &rc_id,
                    &status,
                    &subscriber,
                    now,
                )?;
                found_total += 1;
                if status.is_active {
                    found_active += 1;
                }
            }

            let done = ((index + 1) * batch_size).min(total);
            self.update_progress(|p| {
                p.current = done;
                p.found_active = found_active;
                p.found_total = found_total;
            });
            if done % 100 == 0 || done == total {
                info!(done, total, found_active, "RevenueCat scan progress");
            }
            if done < total {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        self.dashboard.invalidate_all();
        self.update_progress(|p| {
            p.current = total;
            p.status = "completed".to_string();
            p.completed_at = Some(Utc::now());
        });
        info!(found_total, found_active, "RevenueCat scan completed");
        Ok(())
    }

    /// Refreshes one user's stored status from RevenueCat.
    pub async fn refresh_user(&self, backends: &EnvBackends, uid: &str) -> Result<UserRefresh> {
        let profile = backends
            .documents
            .get(USERS_COLLECTION, uid)
            .await?
            .map(|d| d.fields)
            .unwrap_or_default();
        let auth_users = backends.auth.list_users().await.unwrap_or_default();
        let auth = auth_users.iter().find(|a| a.uid == uid);
        let Some(phone) = users::extract_phone(&profile, auth) else {
            return Ok(UserRefresh::NoPhone);
        };

        let rc_id = phone_to_rc_id(&phone);
        let Some(subscriber) = self.api.subscriber(&rc_id).await? else {
            return Ok(UserRefresh::NotFound);
        };
        let now = Utc::now();
        let status = parse_subscriber_status(&subscriber, now);
        self.store
            .save(backends.env, uid, &phone, &rc_id, &status, &subscriber, now)?;
        self.dashboard.invalidate(&backends.env).await;
        Ok(UserRefresh::Updated(status))
    }
}

/// Users with a phone number, auth accounts first, deduplicated by phone.
pub async fn scan_targets(backends: &EnvBackends) -> Result<Vec<ScanTarget>> {
    let auth_users = backends.auth.list_users().await?;
    let profiles = users::index_profiles(backends.documents.list(USERS_COLLECTION).await?);

    let mut seen_phones = HashSet::new();
    let mut targets = Vec::new();
    let empty = Default::default();
    for auth in &auth_users {
        let profile = profiles.get(&auth.uid).unwrap_or(&empty);
        if let Some(phone) = users::extract_phone(profile, Some(auth)) {
            if seen_phones.insert(phone.clone()) {
                targets.push(ScanTarget {
                    uid: auth.uid.clone(),
                    phone,
                });
            }
        }
    }
    let auth_uids: HashSet<&str> = auth_users.iter().map(|a| a.uid.as_str()).collect();
    let mut profile_only: Vec<_> = profiles
        .iter()
        .filter(|(uid, _)| !auth_uids.contains(uid.as_str()))
        .collect();
    profile_only.sort_by(|a, b| a.0.cmp(b.0));
    for (uid, profile) in profile_only {
        let phone = ["phone", "phoneNumber"]
            .iter()
            .filter_map(|k| profile.get(*k).and_then(|v| v.as_str()))
            .find(|p| !p.is_empty());
        if let Some(phone) = phone {
            if seen_phones.insert(phone.to_string()) {
                targets.push(ScanTarget {
                    uid: uid.clone(),
                    phone: phone.to_string(),
                });
            }
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendProvider, MemoryBackends};
    use crate::firestore::DocumentStore;
    use crate::users::AuthUser;
    use serde_json::json;

    fn service(api: MemorySubscriberApi) -> Arc<RevenueCatService> {
        let config = RevenueCatConfig {
            batch_delay_ms: 0,
            ..RevenueCatConfig::default()
        };
        Arc::new(RevenueCatService::new(
            Arc::new(api),
            Arc::new(RevenueCatStore::open_in_memory().unwrap()),
            config,
        ))
    }

    #[test]
    fn progress_survives_a_poisoned_lock() {
        let service = service(MemorySubscriberApi::default());
        let holder = service.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.progress.lock().unwrap();
            panic!("scan task died");
        })
        .join();
        service.update_progress(|p| p.status = "error: scan task died".to_string());
        assert_eq!(service.progress().status, "error: scan task died");
    }

    #[test]
    fn rc_id_is_sha256_hex_of_phone() {
        assert_eq!(
            phone_to_rc_id("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn targets_are_deduplicated_by_phone() {
        let memory = MemoryBackends::new();
        let project = memory.project(FirebaseEnv::Dev);
        project.auth.add(AuthUser {
            phone_number: Some("+331".to_string()),
            ..AuthUser::new("a")
        });
        for (uid, phone) in [("b", "+331"), ("c", "+332"), ("d", "")] {
            project
                .documents
                .set(USERS_COLLECTION, uid, json!({"phone": phone}).as_object().unwrap(), false)
                .await
                .unwrap();
        }
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();
        let targets = scan_targets(&backends).await.unwrap();
        let uids: Vec<&str> = targets.iter().map(|t| t.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn scan_stores_only_subscribers_with_data() {
        let memory = MemoryBackends::new();
        let project = memory.project(FirebaseEnv::Dev);
        for (uid, phone) in [("a", "+331"), ("b", "+332")] {
            project.auth.add(AuthUser {
                phone_number: Some(phone.to_string()),
                ..AuthUser::new(uid)
            });
        }
        let api = MemorySubscriberApi::default();
        api.insert(
            &phone_to_rc_id("+331"),
            json!({ "subscriptions": { "m": { "expires_date": "2999-01-01T00:00:00Z" } } }),
        );
        api.insert(&phone_to_rc_id("+332"), json!({ "subscriptions": {} }));
        let service = service(api);
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();

        let progress = service.run_scan(&backends).await;
        assert_eq!(progress.status, "completed");
        assert_eq!(progress.total, 2);
        assert_eq!(progress.found_total, 1);
        assert_eq!(progress.found_active, 1);
        assert!(!progress.is_running);
        assert!(service.store().get(FirebaseEnv::Dev, "a").unwrap().is_some());
        assert!(service.store().get(FirebaseEnv::Dev, "b").unwrap().is_none());
    }

    #[tokio::test]
    async fn dashboard_falls_back_to_stored_statuses() {
        let service = service(MemorySubscriberApi::default());
        let metrics = service.dashboard_metrics(FirebaseEnv::Prod).await.unwrap();
        assert_eq!(metrics.source, "database_scan");
        assert_eq!(metrics.active_customers, 0.0);
    }

    #[tokio::test]
    async fn dashboard_maps_v2_metric_ids() {
        let api = MemorySubscriberApi::default();
        api.set_overview(vec![
            OverviewMetric {
                id: "revenue".to_string(),
                name: "Revenue".to_string(),
                description: String::new(),
                value: 1234.5,
                unit: Some("$".to_string()),
                period: None,
            },
            OverviewMetric {
                id: "active_users".to_string(),
                name: "Active users".to_string(),
                description: String::new(),
                value: 42.0,
                unit: None,
                period: None,
            },
        ]);
        let metrics = service(api).dashboard_metrics(FirebaseEnv::Prod).await.unwrap();
        assert_eq!(metrics.source, "revenuecat_v2");
        assert_eq!(metrics.revenue_28_days, 1234.5);
        assert_eq!(metrics.active_customers, 42.0);
        assert_eq!(metrics.mrr, 0.0);
    }

    #[tokio::test]
    async fn refresh_without_phone_is_reported() {
        let memory = MemoryBackends::new();
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();
        let service = service(MemorySubscriberApi::default());
        let outcome = service.refresh_user(&backends, "nobody").await.unwrap();
        assert!(matches!(outcome, UserRefresh::NoPhone));
    }
}
