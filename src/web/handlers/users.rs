use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::{backends, page_context};
use crate::pagination::paginate;
use crate::users::{self, compute_metrics};
use crate::web::auth::CurrentSession;
use crate::web::error::PageResult;
use crate::web::state::AppState;
use crate::web::templates::{render, UsersTemplate};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub q: String,
    pub page: Option<usize>,
    pub refresh: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    session: CurrentSession,
    Query(params): Query<ListParams>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let all = users::load_users(&backends, &state.caches, params.refresh.is_some()).await?;
    let metrics = compute_metrics(&all);
    let filtered: Vec<_> = users::filter_users(&all, &params.q)
        .into_iter()
        .cloned()
        .collect();
    let page = paginate(filtered, params.page.unwrap_or(1), state.config.server.users_page_size);
    let ctx = page_context(&state, &session, "users").await;
    Ok(render(&UsersTemplate {
        ctx,
        page,
        metrics,
        search: params.q.trim().to_string(),
    })?
    .into_response())
}
