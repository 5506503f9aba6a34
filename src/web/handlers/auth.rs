use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::web::auth::{check_credentials, expired_session_cookie, session_cookie, session_id_from_headers};
use crate::web::error::PageResult;
use crate::web::state::AppState;
use crate::web::templates::{render, LoginTemplate};

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "butter_admin",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn login_page() -> PageResult<Response> {
    Ok(render(&LoginTemplate { error: None })?.into_response())
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> PageResult<Response> {
    if !check_credentials(&state.config.admin, form.username.trim(), &form.password) {
        warn!(username = %form.username, "Failed login attempt");
        let page = render(&LoginTemplate {
            error: Some("Identifiants invalides".to_string()),
        })?;
        return Ok(page.into_response());
    }

    if let Some(old) = session_id_from_headers(&headers) {
        state.sessions.remove(&old).await;
    }
    let id = state.sessions.create().await;
    let username = form.username.trim().to_string();
    state
        .sessions
        .update(&id, |s| {
            s.authenticated = true;
            s.username = Some(username.clone());
        })
        .await?;
    info!(username = %username, "Admin logged in");

    let max_age = state.config.server.session_ttl_minutes * 60;
    Ok(([(SET_COOKIE, session_cookie(&id, max_age))], Redirect::to("/")).into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id_from_headers(&headers) {
        state.sessions.remove(&id).await;
    }
    ([(SET_COOKIE, expired_session_cookie())], Redirect::to("/login")).into_response()
}
