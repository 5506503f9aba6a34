use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::{backends, flash, page_context};
use crate::media;
use crate::restaurants::{self, display_fields, display_name, RestaurantQuery};
use crate::session::FlashLevel;
use crate::web::auth::CurrentSession;
use crate::web::error::{ApiResult, PageResult};
use crate::web::state::AppState;
use crate::web::templates::{render, RestaurantDetailTemplate, RestaurantFormTemplate, RestaurantsTemplate};

const NEW_RESTAURANT_FIELDS: [&str; 8] = [
    "name",
    "tag",
    "address",
    "arrondissement",
    "phone",
    "website",
    "latitude",
    "longitude",
];

fn is_checked(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1" | "on" | "true"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub q: String,
    pub missing_photos: Option<String>,
    pub missing_logos: Option<String>,
    pub page: Option<usize>,
    pub refresh: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    session: CurrentSession,
    Query(params): Query<ListParams>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    if is_checked(&params.refresh) {
        state.caches.invalidate_restaurants(session.env).await;
    }
    let query = RestaurantQuery {
        search: params.q.trim().to_string(),
        missing_photos: is_checked(&params.missing_photos),
        missing_logos: is_checked(&params.missing_logos),
        page: params.page.unwrap_or(1),
    };
    let page = restaurants::list_restaurants(&backends, &state.caches, &state.config, &query).await?;

    let mut filters = String::new();
    if !query.search.is_empty() {
        filters.push_str(&format!("&q={}", form_urlencoded_value(&query.search)));
    }
    if query.missing_photos {
        filters.push_str("&missing_photos=1");
    }
    if query.missing_logos {
        filters.push_str("&missing_logos=1");
    }

    let ctx = page_context(&state, &session, "restaurants").await;
    Ok(render(&RestaurantsTemplate {
        ctx,
        page,
        search: query.search,
        missing_photos: query.missing_photos,
        missing_logos: query.missing_logos,
        filters,
    })?
    .into_response())
}

fn form_urlencoded_value(value: &str) -> String {
    let mut url = match reqwest::Url::parse("http://localhost/") {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    url.query_pairs_mut().append_pair("q", value);
    url.query()
        .and_then(|q| q.strip_prefix("q="))
        .unwrap_or_default()
        .to_string()
}

pub async fn detail(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let doc = restaurants::get_restaurant(backends.documents.as_ref(), &state.config.import.collection, &id).await?;
    let ids: HashSet<String> = HashSet::from([doc.id.clone()]);
    let index = media::media_index(&backends, &state.caches, &state.config.storage, &ids).await?;
    let ctx = page_context(&state, &session, "restaurants").await;
    Ok(render(&RestaurantDetailTemplate {
        ctx,
        name: display_name(&doc).to_string(),
        fields: display_fields(&doc),
        media: index.info(&doc.id),
        id: doc.id,
    })?
    .into_response())
}

pub async fn json(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let doc = restaurants::get_restaurant(backends.documents.as_ref(), &state.config.import.collection, &id).await?;
    Ok(Json(doc.to_json()))
}

pub async fn new_form(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let ctx = page_context(&state, &session, "restaurants").await;
    Ok(render(&RestaurantFormTemplate {
        ctx,
        title: "Nouveau restaurant".to_string(),
        action: "/restaurants/new".to_string(),
        fields: NEW_RESTAURANT_FIELDS
            .iter()
            .map(|f| (f.to_string(), String::new()))
            .collect(),
    })?
    .into_response())
}

pub async fn create(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<Vec<(String, String)>>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    match restaurants::create_restaurant(&backends, &state.caches, &state.config.import.collection, &form).await {
        Ok(id) => {
            flash(&state, &session, FlashLevel::Success, format!("Restaurant {} créé", id)).await;
            Ok(Redirect::to(&format!("/restaurants/{}", id)).into_response())
        }
        Err(e) => {
            flash(&state, &session, FlashLevel::Error, format!("Création impossible: {}", e)).await;
            Ok(Redirect::to("/restaurants/new").into_response())
        }
    }
}

pub async fn edit_form(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let doc = restaurants::get_restaurant(backends.documents.as_ref(), &state.config.import.collection, &id).await?;
    let ctx = page_context(&state, &session, "restaurants").await;
    Ok(render(&RestaurantFormTemplate {
        ctx,
        title: format!("Modifier {}", display_name(&doc)),
        action: format!("/restaurants/{}/edit", doc.id),
        fields: display_fields(&doc)
            .into_iter()
            .filter(|(k, _)| k != "id")
            .collect(),
    })?
    .into_response())
}

pub async fn update(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
    Form(form): Form<Vec<(String, String)>>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    match restaurants::update_restaurant(&backends, &state.caches, &state.config.import.collection, &id, &form).await {
        Ok(()) => flash(&state, &session, FlashLevel::Success, "Restaurant mis à jour").await,
        Err(e) => flash(&state, &session, FlashLevel::Error, format!("Mise à jour impossible: {}", e)).await,
    }
    Ok(Redirect::to(&format!("/restaurants/{}", id)).into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    restaurants::delete_restaurant(&backends, &state.caches, &state.config.import.collection, &id).await?;
    flash(&state, &session, FlashLevel::Success, format!("Restaurant {} supprimé", id)).await;
    Ok(Redirect::to("/restaurants").into_response())
}
