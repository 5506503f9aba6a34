//! App users: Firestore profiles merged with Firebase Auth accounts and FCM
//! tokens.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::backends::EnvBackends;
use crate::cache::EnvCaches;
use crate::error::{AdminError, Result};
use crate::firestore::{Document, Fields};
use crate::google_auth::TokenProvider;

pub const USERS_COLLECTION: &str = "users";
pub const FCM_TOKENS_COLLECTION: &str = "fcm_tokens";

const IDENTITY_TOOLKIT_API: &str = "https://identitytoolkit.googleapis.com/v1";
const ONLINE_THRESHOLD_MINUTES: i64 = 15;
const RECENT_THRESHOLD_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_sign_in: Option<DateTime<Utc>>,
    pub disabled: bool,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            phone_number: None,
            created_at: None,
            last_sign_in: None,
            disabled: false,
        }
    }
}

#[async_trait]
pub trait AuthDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<AuthUser>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    phone_number: Option<String>,
    created_at: Option<String>,
    last_login_at: Option<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
    next_page_token: Option<String>,
}

fn millis_to_datetime(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

impl From<AccountInfo> for AuthUser {
    fn from(info: AccountInfo) -> Self {
        Self {
            created_at: millis_to_datetime(info.created_at.as_deref()),
            last_sign_in: millis_to_datetime(info.last_login_at.as_deref()),
            uid: info.local_id,
            email: info.email,
            display_name: info.display_name,
            phone_number: info.phone_number,
            disabled: info.disabled,
        }
    }
}

/// Lists Firebase Auth accounts through the Identity Toolkit admin API.
pub struct IdentityToolkitClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    project_id: String,
}

impl IdentityToolkitClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenProvider>, project_id: impl Into<String>) -> Self {
        Self {
            http,
            tokens,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl AuthDirectory for IdentityToolkitClient {
    async fn list_users(&self) -> Result<Vec<AuthUser>> {
        let mut users = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = Url::parse(&format!(
                "{}/projects/{}/accounts:batchGet",
                IDENTITY_TOOLKIT_API, self.project_id
            ))
            .map_err(|e| AdminError::Config(format!("invalid Identity Toolkit URL: {}", e)))?;
            url.query_pairs_mut().append_pair("maxResults", "1000");
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("nextPageToken", token);
            }
            let token = self.tokens.access_token().await?;
            let response = self.http.get(url).bearer_auth(token).send().await?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(AdminError::api(status, body));
            }
            let page: BatchGetResponse = response.json().await?;
            users.extend(page.users.into_iter().map(AuthUser::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(users)
    }
}

/// Fixed account list for tests.
#[derive(Clone, Default)]
pub struct MemoryAuthDirectory {
    users: Arc<Mutex<Vec<AuthUser>>>,
}

impl MemoryAuthDirectory {
    pub fn add(&self, user: AuthUser) {
        self.users.lock().unwrap().push(user);
    }
}

#[async_trait]
impl AuthDirectory for MemoryAuthDirectory {
    async fn list_users(&self) -> Result<Vec<AuthUser>> {
        Ok(self.users.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Online,
    Recent,
    Inactive,
    Never,
}

impl ConnectionState {
    pub fn from_last_sign_in(last_sign_in: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(last) = last_sign_in else {
            return ConnectionState::Never;
        };
        let delta = now - last;
        if delta <= Duration::minutes(ONLINE_THRESHOLD_MINUTES) {
            ConnectionState::Online
        } else if delta <= Duration::days(RECENT_THRESHOLD_DAYS) {
            ConnectionState::Recent
        } else {
            ConnectionState::Inactive
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Online => "En ligne",
            ConnectionState::Recent => "Actif récemment",
            ConnectionState::Inactive => "Inactif",
            ConnectionState::Never => "Jamais connecté",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ConnectionState::Online => "badge-online",
            _ => "badge-muted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserEntry {
    pub uid: String,
    pub display_name: String,
    pub prenom: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_sign_in: Option<DateTime<Utc>>,
    pub connection: ConnectionState,
    pub birthdate: Option<String>,
    pub fcm_tokens: Vec<String>,
    pub has_auth: bool,
    pub has_profile: bool,
    pub search_index: String,
}

impl UserEntry {
    pub fn has_fcm_token(&self) -> bool {
        !self.fcm_tokens.is_empty()
    }

    pub fn created_at_display(&self) -> String {
        format_datetime(self.created_at)
    }

    pub fn last_sign_in_display(&self) -> String {
        format_datetime(self.last_sign_in)
    }
}

pub fn format_datetime(dt: Option<DateTime<Utc>>) -> String {
    match dt {
        Some(dt) => dt.format("%d/%m/%Y %H:%M").to_string(),
        None => "—".to_string(),
    }
}

/// Accepts RFC 3339 strings and epoch numbers (seconds, or milliseconds when
/// above 1e12).
pub fn normalize_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) if !s.is_empty() => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            let secs = if raw > 1e12 { raw / 1000.0 } else { raw };
            Utc.timestamp_opt(secs.trunc() as i64, 0).single()
        }
        _ => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn build_display_name(profile: &Fields, auth: Option<&AuthUser>) -> String {
    let mut candidates: Vec<Option<String>> = ["name", "nom", "fullname", "full_name"]
        .iter()
        .map(|k| non_empty(profile.get(*k)))
        .collect();
    let prenom = non_empty(profile.get("prenom"));
    let nom = non_empty(profile.get("nom"));
    if prenom.is_some() || nom.is_some() {
        let joined = format!(
            "{} {}",
            prenom.unwrap_or_default(),
            nom.unwrap_or_default()
        );
        candidates.push(Some(joined.trim().to_string()));
    }
    if let Some(auth) = auth {
        candidates.push(auth.display_name.clone());
    }
    candidates
        .into_iter()
        .flatten()
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
        .unwrap_or_else(|| "Utilisateur sans nom".to_string())
}

pub fn extract_phone(profile: &Fields, auth: Option<&AuthUser>) -> Option<String> {
    ["phone", "phoneNumber", "telephone", "tel"]
        .iter()
        .find_map(|k| non_empty(profile.get(*k)))
        .or_else(|| auth.and_then(|a| a.phone_number.clone()))
        .filter(|p| !p.is_empty())
}

pub fn extract_email(profile: &Fields, auth: Option<&AuthUser>) -> Option<String> {
    non_empty(profile.get("email"))
        .or_else(|| non_empty(profile.get("mail")))
        .or_else(|| auth.and_then(|a| a.email.clone()))
        .filter(|e| !e.is_empty())
}

fn extract_created_at(profile: &Fields, auth: Option<&AuthUser>) -> Option<DateTime<Utc>> {
    profile
        .get("createdAt")
        .or_else(|| profile.get("created_at"))
        .and_then(normalize_datetime)
        .or_else(|| auth.and_then(|a| a.created_at))
}

pub fn build_user_entry(
    uid: &str,
    profile: &Fields,
    auth: Option<&AuthUser>,
    tokens: &[String],
    now: DateTime<Utc>,
) -> UserEntry {
    let display_name = build_display_name(profile, auth);
    let email = extract_email(profile, auth);
    let phone = extract_phone(profile, auth);
    let birthdate =
        non_empty(profile.get("dateNaissance")).or_else(|| non_empty(profile.get("birthdate")));
    let last_sign_in = auth.and_then(|a| a.last_sign_in);

    let search_index = [
        Some(uid.to_string()),
        Some(display_name.clone()),
        email.clone(),
        phone.clone(),
        birthdate.clone(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();

    UserEntry {
        uid: uid.to_string(),
        prenom: non_empty(profile.get("prenom")),
        display_name,
        email,
        phone,
        created_at: extract_created_at(profile, auth),
        last_sign_in,
        connection: ConnectionState::from_last_sign_in(last_sign_in, now),
        birthdate,
        fcm_tokens: tokens.to_vec(),
        has_auth: auth.is_some(),
        has_profile: !profile.is_empty(),
        search_index,
    }
}

/// Profiles keyed by their `uid` field, falling back to the document id.
pub fn index_profiles(profiles: Vec<Document>) -> HashMap<String, Fields> {
    profiles
        .into_iter()
        .map(|doc| {
            let uid = doc.get_str("uid").map(str::to_string).unwrap_or(doc.id);
            (uid, doc.fields)
        })
        .collect()
}

/// Token strings grouped by the `userId` field of each `fcm_tokens` document.
pub fn tokens_by_user(token_docs: &[Document]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for doc in token_docs {
        let Some(user_id) = doc.get_str("userId").filter(|u| !u.is_empty()) else {
            continue;
        };
        let entry = grouped.entry(user_id.to_string()).or_default();
        if let Some(token) = doc.get_str("token").filter(|t| !t.is_empty()) {
            entry.push(token.to_string());
        }
    }
    grouped
}

/// Auth accounts first, then profiles without an account, sorted by name.
pub fn merge_users(
    profiles: HashMap<String, Fields>,
    auth_users: Vec<AuthUser>,
    tokens: &HashMap<String, Vec<String>>,
    now: DateTime<Utc>,
) -> Vec<UserEntry> {
    let empty_profile = Fields::new();
    let mut handled = HashSet::new();
    let mut merged = Vec::with_capacity(auth_users.len().max(profiles.len()));

    for auth in &auth_users {
        let profile = profiles.get(&auth.uid).unwrap_or(&empty_profile);
        let user_tokens = tokens.get(&auth.uid).map(Vec::as_slice).unwrap_or(&[]);
        merged.push(build_user_entry(&auth.uid, profile, Some(auth), user_tokens, now));
        handled.insert(auth.uid.clone());
    }
    for (uid, profile) in &profiles {
        if handled.contains(uid) {
            continue;
        }
        let user_tokens = tokens.get(uid).map(Vec::as_slice).unwrap_or(&[]);
        merged.push(build_user_entry(uid, profile, None, user_tokens, now));
    }

    merged.sort_by_key(|u| u.display_name.to_lowercase());
    merged
}

/// Merged user list for the backends' environment, cached per environment.
pub async fn load_users(
    backends: &EnvBackends,
    caches: &EnvCaches,
    force_refresh: bool,
) -> Result<Arc<Vec<UserEntry>>> {
    if !force_refresh {
        if let Some(cached) = caches.users.get(&backends.env).await {
            return Ok(cached);
        }
    }

    let profiles = backends.documents.list(USERS_COLLECTION).await?;
    let auth_users = match backends.auth.list_users().await {
        Ok(users) => users,
        Err(e) => {
            warn!(env = %backends.env, "Failed to list Firebase Auth users: {}", e);
            Vec::new()
        }
    };
    let token_docs = backends.documents.list(FCM_TOKENS_COLLECTION).await?;
    let tokens = tokens_by_user(&token_docs);

    let merged = Arc::new(merge_users(
        index_profiles(profiles),
        auth_users,
        &tokens,
        Utc::now(),
    ));
    info!(env = %backends.env, count = merged.len(), "Merged users");
    caches.users.insert(backends.env, merged.clone()).await;
    Ok(merged)
}

pub fn filter_users<'a>(users: &'a [UserEntry], query: &str) -> Vec<&'a UserEntry> {
    let q = query.trim().to_lowercase();
    users
        .iter()
        .filter(|u| q.is_empty() || u.search_index.contains(&q))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserMetrics {
    pub total: usize,
    pub online: usize,
    pub tokens_total: usize,
}

pub fn compute_metrics(users: &[UserEntry]) -> UserMetrics {
    UserMetrics {
        total: users.len(),
        online: users
            .iter()
            .filter(|u| u.connection == ConnectionState::Online)
            .count(),
        tokens_total: users.iter().map(|u| u.fcm_tokens.len()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn connection_state_thresholds() {
        let now = Utc::now();
        assert_eq!(
            ConnectionState::from_last_sign_in(Some(now - Duration::minutes(14)), now),
            ConnectionState::Online
        );
        assert_eq!(
            ConnectionState::from_last_sign_in(Some(now - Duration::minutes(16)), now),
            ConnectionState::Recent
        );
        assert_eq!(
            ConnectionState::from_last_sign_in(Some(now - Duration::days(8)), now),
            ConnectionState::Inactive
        );
        assert_eq!(ConnectionState::from_last_sign_in(None, now), ConnectionState::Never);
    }

    #[test]
    fn display_name_prefers_profile_then_auth() {
        let auth = AuthUser {
            display_name: Some("Auth Name".to_string()),
            ..AuthUser::new("u1")
        };
        assert_eq!(
            build_display_name(&fields(json!({"prenom": "Léa"})), Some(&auth)),
            "Léa"
        );
        assert_eq!(build_display_name(&Fields::new(), Some(&auth)), "Auth Name");
        assert_eq!(build_display_name(&Fields::new(), None), "Utilisateur sans nom");
    }

    #[test]
    fn phone_falls_back_to_auth_account() {
        let auth = AuthUser {
            phone_number: Some("+33600000000".to_string()),
            ..AuthUser::new("u1")
        };
        assert_eq!(
            extract_phone(&fields(json!({"tel": "0611"})), Some(&auth)).as_deref(),
            Some("0611")
        );
        assert_eq!(
            extract_phone(&Fields::new(), Some(&auth)).as_deref(),
            Some("+33600000000")
        );
    }

    #[test]
    fn merge_includes_profiles_without_auth_and_sorts() {
        let profiles = index_profiles(vec![
            Document::new("doc-b", fields(json!({"uid": "b", "name": "bob"}))),
            Document::new("c", fields(json!({"name": "Alice"}))),
        ]);
        let auth = vec![AuthUser::new("b")];
        let token_docs = vec![Document::new(
            "b",
            fields(json!({"userId": "b", "token": "tok"})),
        )];
        let merged = merge_users(profiles, auth, &tokens_by_user(&token_docs), Utc::now());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].display_name, "Alice");
        assert!(!merged[0].has_auth);
        assert_eq!(merged[1].uid, "b");
        assert!(merged[1].has_fcm_token());
        assert_eq!(compute_metrics(&merged).tokens_total, 1);
    }

    #[test]
    fn normalize_datetime_accepts_millis_and_iso() {
        let ms = normalize_datetime(&json!(1_700_000_000_000i64)).unwrap();
        let secs = normalize_datetime(&json!(1_700_000_000)).unwrap();
        assert_eq!(ms, secs);
        assert!(normalize_datetime(&json!("2025-01-02T03:04:05Z")).is_some());
        assert!(normalize_datetime(&json!("not a date")).is_none());
    }

    #[test]
    fn filter_matches_search_index() {
        let user = build_user_entry(
            "u1",
            &fields(json!({"name": "Marie", "email": "marie@example.com"})),
            None,
            &[],
            Utc::now(),
        );
        let users = vec![user];
        assert_eq!(filter_users(&users, "EXAMPLE").len(), 1);
        assert!(filter_users(&users, "paul").is_empty());
    }
}
