//! Push notifications through Firebase Cloud Messaging.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::backends::EnvBackends;
use crate::config::NotificationsConfig;
use crate::error::{AdminError, Result};
use crate::google_auth::TokenProvider;
use crate::metrics;
use crate::revenuecat::phone_to_rc_id;
use crate::users::{self, FCM_TOKENS_COLLECTION, USERS_COLLECTION};

const FCM_API: &str = "https://fcm.googleapis.com/v1";
const LOGGED_FAILURES_PER_BATCH: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() || self.body.trim().is_empty() {
            return Err(AdminError::Validation(
                "Les champs title et body sont requis".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with every `{prenom}` placeholder replaced.
    pub fn personalized(&self, prenom: &str) -> Self {
        Self {
            title: self.title.replace("{prenom}", prenom),
            body: self.body.replace("{prenom}", prenom),
            data: self.data.clone(),
        }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends one message to one device. Returns the message id.
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String>;
}

pub struct FcmClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    project_id: String,
}

impl FcmClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenProvider>, project_id: impl Into<String>) -> Self {
        Self {
            http,
            tokens,
            project_id: project_id.into(),
        }
    }
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

#[async_trait]
impl Messenger for FcmClient {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String> {
        let url = format!("{}/projects/{}/messages:send", FCM_API, self.project_id);
        let body = json!({
            "message": {
                "token": token,
                "notification": { "title": message.title, "body": message.body },
                "data": message.data,
                "apns": { "payload": { "aps": { "sound": "default", "badge": 1 } } }
            }
        });
        let access = self.tokens.access_token().await?;
        let response = self.http.post(url).bearer_auth(access).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(AdminError::api(status, text));
        }
        let sent: SendResponse = response.json().await?;
        Ok(sent.name)
    }
}

/// Records sent messages instead of delivering them.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    sent: Arc<Mutex<Vec<(String, PushMessage)>>>,
    rejected: Arc<Mutex<HashSet<String>>>,
}

impl RecordingMessenger {
    pub fn reject_token(&self, token: &str) {
        self.rejected.lock().unwrap().insert(token.to_string());
    }

    pub fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String> {
        if self.rejected.lock().unwrap().contains(token) {
            return Err(AdminError::api(404, "registration token not registered"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((token.to_string(), message.clone()));
        Ok(format!("messages/{}", sent.len()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub total_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_users: Option<Vec<String>>,
}

/// Sends `message` to `tokens` in batches. Messages within a batch go out
/// concurrently; batches are separated by `batch_delay_ms`.
pub async fn send_multicast(
    messenger: &dyn Messenger,
    tokens: &[String],
    message: &PushMessage,
    config: &NotificationsConfig,
) -> SendResult {
    let batch_size = config.batch_size.max(1);
    let total_batches = tokens.len().div_ceil(batch_size);
    let mut result = SendResult {
        total_tokens: tokens.len(),
        ..SendResult::default()
    };

    for (index, batch) in tokens.chunks(batch_size).enumerate() {
        info!(
            batch = index + 1,
            total_batches,
            tokens = batch.len(),
            "Sending notification batch"
        );
        let outcomes = join_all(batch.iter().map(|t| messenger.send(t, message))).await;
        let mut batch_failures = 0;
        for outcome in outcomes {
            match outcome {
                Ok(_) => result.success_count += 1,
                Err(e) => {
                    batch_failures += 1;
                    if batch_failures <= LOGGED_FAILURES_PER_BATCH {
                        warn!(batch = index + 1, "Notification failed: {}", e);
                    }
                }
            }
        }
        if batch_failures > LOGGED_FAILURES_PER_BATCH {
            warn!(
                batch = index + 1,
                "... and {} more failures",
                batch_failures - LOGGED_FAILURES_PER_BATCH
            );
        }
        result.failure_count += batch_failures;

        if index + 1 < total_batches {
            tokio::time::sleep(Duration::from_millis(config.batch_delay_ms)).await;
        }
    }
    result
}

struct TokenTarget {
    user_id: String,
    token: String,
    prenom: Option<String>,
}

async fn collect_targets(backends: &EnvBackends) -> Result<Vec<TokenTarget>> {
    let docs = backends.documents.list(FCM_TOKENS_COLLECTION).await?;
    let mut targets = Vec::new();
    let mut without_token = 0;
    for doc in docs {
        match doc.get_str("token").filter(|t| !t.is_empty()) {
            Some(token) => targets.push(TokenTarget {
                token: token.to_string(),
                prenom: doc.get_str("prenom").map(str::to_string),
                user_id: doc.id,
            }),
            None => without_token += 1,
        }
    }
    info!(
        env = %backends.env,
        valid = targets.len(),
        without_token,
        "Collected FCM tokens"
    );
    Ok(targets)
}

pub async fn send_to_all(
    backends: &EnvBackends,
    message: &PushMessage,
    config: &NotificationsConfig,
) -> Result<SendResult> {
    message.validate()?;
    let targets = collect_targets(backends).await?;
    if targets.is_empty() {
        warn!(env = %backends.env, "No FCM token found");
        return Ok(SendResult::default());
    }
    let tokens: Vec<String> = targets.into_iter().map(|t| t.token).collect();
    let result = send_multicast(backends.messenger.as_ref(), &tokens, message, config).await;
    record(backends, &result);
    Ok(result)
}

/// Sends one personalised message per token. The first name comes from the
/// token document, then from `users/<uid>`, else is left empty.
pub async fn send_to_all_with_prenom(
    backends: &EnvBackends,
    template: &PushMessage,
) -> Result<SendResult> {
    template.validate()?;
    let mut targets = collect_targets(backends).await?;
    if targets.is_empty() {
        warn!(env = %backends.env, "No FCM token found");
        return Ok(SendResult::default());
    }

    for target in targets.iter_mut().filter(|t| t.prenom.is_none()) {
        match backends.documents.get(USERS_COLLECTION, &target.user_id).await {
            Ok(Some(profile)) => target.prenom = profile.get_str("prenom").map(str::to_string),
            Ok(None) => {}
            Err(e) => error!(user_id = %target.user_id, "Failed to load first name: {}", e),
        }
    }

    let mut result = SendResult {
        total_tokens: targets.len(),
        ..SendResult::default()
    };
    for target in &targets {
        let message = template.personalized(target.prenom.as_deref().unwrap_or_default());
        match backends.messenger.send(&target.token, &message).await {
            Ok(_) => result.success_count += 1,
            Err(e) => {
                warn!(user_id = %target.user_id, "Personalised notification failed: {}", e);
                result.failure_count += 1;
            }
        }
    }
    record(backends, &result);
    Ok(result)
}

/// Sends to the given user ids. Users without a token document count as
/// failures and are returned in `invalid_users`.
pub async fn send_to_group(
    backends: &EnvBackends,
    user_ids: &[String],
    message: &PushMessage,
    config: &NotificationsConfig,
) -> Result<SendResult> {
    if user_ids.is_empty() {
        return Err(AdminError::Validation(
            "Le champ userIds doit être un tableau non vide".to_string(),
        ));
    }
    message.validate()?;

    let mut tokens = Vec::new();
    let mut invalid_users = Vec::new();
    for user_id in user_ids {
        match backends.documents.get(FCM_TOKENS_COLLECTION, user_id).await {
            Ok(Some(doc)) => match doc.get_str("token").filter(|t| !t.is_empty()) {
                Some(token) => tokens.push(token.to_string()),
                None => invalid_users.push(user_id.clone()),
            },
            Ok(None) => invalid_users.push(user_id.clone()),
            Err(e) => {
                error!(user_id = %user_id, "Failed to load FCM token: {}", e);
                invalid_users.push(user_id.clone());
            }
        }
    }

    if tokens.is_empty() {
        warn!(env = %backends.env, "No valid FCM token in group");
        return Ok(SendResult {
            success_count: 0,
            failure_count: user_ids.len(),
            total_tokens: 0,
            invalid_users: Some(invalid_users),
        });
    }

    let sent = send_multicast(backends.messenger.as_ref(), &tokens, message, config).await;
    let result = SendResult {
        success_count: sent.success_count,
        failure_count: sent.failure_count + invalid_users.len(),
        total_tokens: tokens.len(),
        invalid_users: (!invalid_users.is_empty()).then_some(invalid_users),
    };
    record(backends, &result);
    Ok(result)
}

fn record(backends: &EnvBackends, result: &SendResult) {
    metrics::notifications::sent(backends.env.as_str(), result.success_count);
    metrics::notifications::failed(backends.env.as_str(), result.failure_count);
    info!(
        env = %backends.env,
        success = result.success_count,
        failure = result.failure_count,
        total = result.total_tokens,
        "Notifications sent"
    );
}

/// A user that can be picked for a group notification.
#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub uid: String,
    pub prenom: String,
    pub email: String,
    pub phone: String,
    pub app_user_id: String,
}

/// Users holding at least one FCM token, sorted by first name.
pub async fn recipients(backends: &EnvBackends) -> Result<Vec<Recipient>> {
    let profiles = users::index_profiles(backends.documents.list(USERS_COLLECTION).await?);
    let auth_users = backends.auth.list_users().await.unwrap_or_else(|e| {
        warn!(env = %backends.env, "Failed to list Firebase Auth users: {}", e);
        Vec::new()
    });
    let token_docs = backends.documents.list(FCM_TOKENS_COLLECTION).await?;
    let tokens = users::tokens_by_user(&token_docs);

    let empty = Default::default();
    let mut list: Vec<Recipient> = tokens
        .iter()
        .filter(|(_, user_tokens)| !user_tokens.is_empty())
        .map(|(uid, _)| {
            let profile = profiles.get(uid).unwrap_or(&empty);
            let auth = auth_users.iter().find(|a| &a.uid == uid);
            let prenom = profile
                .get("prenom")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .or_else(|| auth.and_then(|a| a.display_name.clone()))
                .unwrap_or_else(|| "Utilisateur".to_string());
            let email = auth
                .and_then(|a| a.email.clone())
                .or_else(|| users::extract_email(profile, None))
                .unwrap_or_else(|| "N/A".to_string());
            let phone = users::extract_phone(profile, auth);
            Recipient {
                uid: uid.clone(),
                prenom,
                email,
                app_user_id: phone.as_deref().map(phone_to_rc_id).unwrap_or_default(),
                phone: phone.unwrap_or_else(|| "N/A".to_string()),
            }
        })
        .collect();
    list.sort_by(|a, b| a.prenom.cmp(&b.prenom));
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendProvider, MemoryBackends};
    use crate::environment::FirebaseEnv;
    use crate::firestore::{DocumentStore, Fields};
    use serde_json::Value;

    fn fields(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    fn fast_config() -> NotificationsConfig {
        NotificationsConfig {
            batch_size: 2,
            batch_delay_ms: 0,
        }
    }

    async fn seed_tokens(memory: &MemoryBackends) {
        let store = &memory.project(FirebaseEnv::Dev).documents;
        for (uid, token, prenom) in [("u1", "t1", Some("Léa")), ("u2", "t2", None), ("u3", "", None)] {
            let mut doc = fields(serde_json::json!({"userId": uid, "token": token}));
            if let Some(p) = prenom {
                doc.insert("prenom".to_string(), Value::String(p.to_string()));
            }
            store.set(FCM_TOKENS_COLLECTION, uid, &doc, false).await.unwrap();
        }
    }

    #[tokio::test]
    async fn send_to_all_skips_documents_without_token() {
        let memory = MemoryBackends::new();
        seed_tokens(&memory).await;
        memory.project(FirebaseEnv::Dev).messenger.reject_token("t2");
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();

        let result = send_to_all(&backends, &PushMessage::new("Hi", "There"), &fast_config())
            .await
            .unwrap();
        assert_eq!(result.total_tokens, 2);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
    }

    #[tokio::test]
    async fn prenom_is_substituted_and_falls_back_to_profile() {
        let memory = MemoryBackends::new();
        seed_tokens(&memory).await;
        memory
            .project(FirebaseEnv::Dev)
            .documents
            .set(USERS_COLLECTION, "u2", &fields(serde_json::json!({"prenom": "Marc"})), false)
            .await
            .unwrap();
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();

        let template = PushMessage::new("Salut {prenom}", "Bonjour {prenom} !");
        send_to_all_with_prenom(&backends, &template)
            .await
            .unwrap();
        let mut titles: Vec<String> = memory
            .project(FirebaseEnv::Dev)
            .messenger
            .sent()
            .into_iter()
            .map(|(_, m)| m.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["Salut Léa", "Salut Marc"]);
    }

    #[tokio::test]
    async fn group_counts_unknown_users_as_failures() {
        let memory = MemoryBackends::new();
        seed_tokens(&memory).await;
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();
        let ids = vec!["u1".to_string(), "u3".to_string(), "ghost".to_string()];

        let result = send_to_group(&backends, &ids, &PushMessage::new("T", "B"), &fast_config())
            .await
            .unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert_eq!(
            result.invalid_users,
            Some(vec!["u3".to_string(), "ghost".to_string()])
        );
    }

    #[tokio::test]
    async fn group_without_any_token_fails_every_user() {
        let memory = MemoryBackends::new();
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        let result = send_to_group(&backends, &ids, &PushMessage::new("T", "B"), &fast_config())
            .await
            .unwrap();
        assert_eq!(result.failure_count, 2);
        assert_eq!(result.total_tokens, 0);
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let memory = MemoryBackends::new();
        let backends = memory.for_env(FirebaseEnv::Dev).unwrap();
        let err = send_to_all(&backends, &PushMessage::new("", "B"), &fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
    }

    #[tokio::test]
    async fn multicast_batches_all_tokens() {
        let messenger = RecordingMessenger::default();
        let tokens: Vec<String> = (0..5).map(|i| format!("t{}", i)).collect();
        let result =
            send_multicast(&messenger, &tokens, &PushMessage::new("a", "b"), &fast_config()).await;
        assert_eq!(result.success_count, 5);
        assert_eq!(messenger.sent().len(), 5);
    }
}
