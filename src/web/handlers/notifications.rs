use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{backends, page_context};
use crate::notifications::{self, PushMessage};
use crate::web::auth::CurrentSession;
use crate::web::error::{ApiResult, PageResult};
use crate::web::state::AppState;
use crate::web::templates::{render, NotificationsTemplate};

pub async fn page(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let recipients = notifications::recipients(&backends).await.unwrap_or_else(|e| {
        warn!(env = %session.env, "Recipients unavailable: {}", e);
        Vec::new()
    });
    let ctx = page_context(&state, &session, "notifications").await;
    Ok(render(&NotificationsTemplate { ctx, recipients })?.into_response())
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    All,
    AllPersonalized,
    Group,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

pub async fn send(
    State(state): State<AppState>,
    session: CurrentSession,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let message = PushMessage {
        title: request.title,
        body: request.body,
        data: request.data,
    };
    let config = &state.config.notifications;
    let result = match request.audience {
        Audience::All => notifications::send_to_all(&backends, &message, config).await?,
        Audience::AllPersonalized => {
            notifications::send_to_all_with_prenom(&backends, &message).await?
        }
        Audience::Group => {
            notifications::send_to_group(&backends, &request.user_ids, &message, config).await?
        }
    };
    info!(
        env = %session.env,
        audience = ?request.audience,
        success = result.success_count,
        failure = result.failure_count,
        "Notification sent"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Notification envoyée à {} appareil(s) sur {}",
            result.success_count, result.total_tokens
        ),
        "result": result,
    })))
}
