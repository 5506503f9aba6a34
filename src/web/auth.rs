//! Cookie sessions and the login guard.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{ACCEPT, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::AdminConfig;
use crate::environment::FirebaseEnv;
use crate::session::{SessionData, SESSION_COOKIE};
use crate::web::state::AppState;

pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(id: &str, max_age_secs: u64) -> HeaderValue {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, id, max_age_secs
    );
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn expired_session_cookie() -> HeaderValue {
    session_cookie("", 0)
}

/// Compares the SHA-256 of `password` with the configured hash. An empty
/// configured hash rejects every login.
pub fn check_credentials(admin: &AdminConfig, username: &str, password: &str) -> bool {
    if admin.password_sha256.is_empty() || username != admin.username {
        return false;
    }
    let digest = hex::encode(Sha256::digest(password.as_bytes()));
    digest.eq_ignore_ascii_case(admin.password_sha256.trim())
}

/// An authenticated session and the environment it currently targets.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub id: String,
    pub data: SessionData,
    pub env: FirebaseEnv,
}

pub enum AuthRejection {
    Redirect,
    Unauthorized,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::Redirect => Redirect::to("/login").into_response(),
            AuthRejection::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "Authentification requise" })),
            )
                .into_response(),
        }
    }
}

fn wants_json(parts: &Parts) -> bool {
    parts.uri.path().starts_with("/api/")
        || parts
            .headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"))
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let rejection = if wants_json(parts) {
            AuthRejection::Unauthorized
        } else {
            AuthRejection::Redirect
        };
        let Some(id) = session_id_from_headers(&parts.headers) else {
            return Err(rejection);
        };
        match state.sessions.get(&id).await {
            Some(data) if data.authenticated => {
                let env = data
                    .firebase_env
                    .unwrap_or_else(|| state.environments.default_env());
                Ok(CurrentSession { id, data, env })
            }
            _ => Err(rejection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_read_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; butter_session=abc-123"));
        assert_eq!(session_id_from_headers(&headers), Some("abc-123".to_string()));
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn credentials_compare_password_hash() {
        let admin = AdminConfig {
            username: "admin".to_string(),
            password_sha256: hex::encode(Sha256::digest(b"secret")),
        };
        assert!(check_credentials(&admin, "admin", "secret"));
        assert!(!check_credentials(&admin, "admin", "wrong"));
        assert!(!check_credentials(&admin, "root", "secret"));
        assert!(!check_credentials(&AdminConfig::default(), "admin", ""));
    }
}
