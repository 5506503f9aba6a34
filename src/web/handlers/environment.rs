use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::environment::{self, FirebaseEnv};
use crate::web::auth::CurrentSession;
use crate::web::error::ApiResult;
use crate::web::state::AppState;

pub async fn status(State(state): State<AppState>, session: CurrentSession) -> Json<Value> {
    let environments: Vec<_> = FirebaseEnv::ALL
        .iter()
        .map(|env| state.environments.status(*env))
        .collect();
    Json(json!({
        "success": true,
        "current": session.env,
        "label": session.env.label(),
        "default": state.environments.default_env(),
        "environments": environments,
    }))
}

#[derive(Deserialize)]
pub struct SwitchRequest {
    pub env: String,
}

pub async fn switch(
    State(state): State<AppState>,
    session: CurrentSession,
    Json(request): Json<SwitchRequest>,
) -> ApiResult<Json<Value>> {
    let env = environment::switch(&state.sessions, &state.caches, &session.id, &request.env).await?;
    Ok(Json(json!({
        "success": true,
        "env": env,
        "label": env.label(),
        "message": format!("Environnement basculé sur {}", env.label()),
    })))
}
