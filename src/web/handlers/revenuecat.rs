use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{backends, page_context};
use crate::revenuecat::{ScanProgress, UserRefresh};
use crate::web::auth::CurrentSession;
use crate::web::error::{ApiResult, PageResult};
use crate::web::state::AppState;
use crate::web::templates::{render, RevenueCatTemplate};

pub async fn dashboard(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let metrics = state.revenuecat.dashboard_metrics(session.env).await?;
    let statuses = state.revenuecat.store().list(session.env).unwrap_or_else(|e| {
        warn!(env = %session.env, "Stored statuses unavailable: {}", e);
        Vec::new()
    });
    let progress = state.revenuecat.progress();
    let ctx = page_context(&state, &session, "revenuecat").await;
    Ok(render(&RevenueCatTemplate {
        ctx,
        metrics,
        statuses,
        progress,
    })?
    .into_response())
}

pub async fn start_scan(State(state): State<AppState>, session: CurrentSession) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let started = state.revenuecat.start_scan(backends);
    if started {
        info!(env = %session.env, "RevenueCat scan started");
    }
    Ok(Json(json!({
        "success": started,
        "message": if started { "Scan démarré" } else { "Un scan est déjà en cours" },
        "progress": state.revenuecat.progress(),
    })))
}

pub async fn scan_status(State(state): State<AppState>, _session: CurrentSession) -> Json<ScanProgress> {
    Json(state.revenuecat.progress())
}

pub async fn refresh_user(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let body = match state.revenuecat.refresh_user(&backends, &uid).await? {
        UserRefresh::NoPhone => json!({
            "success": false,
            "error": "Aucun numéro de téléphone pour cet utilisateur",
        }),
        UserRefresh::NotFound => json!({
            "success": false,
            "error": "Utilisateur introuvable dans RevenueCat",
        }),
        UserRefresh::Updated(status) => json!({
            "success": true,
            "label": status.label(),
            "status": status,
        }),
    };
    Ok(Json(body))
}
