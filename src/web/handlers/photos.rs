use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{backends, form_value, page_context, read_multipart};
use crate::cache::MediaFolder;
use crate::error::AdminError;
use crate::media::{self, PhotoItem};
use crate::pagination::paginate;
use crate::web::auth::CurrentSession;
use crate::web::error::{ApiResult, PageResult};
use crate::web::state::AppState;
use crate::web::templates::{render, PhotosTemplate};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub folder: Option<String>,
    #[serde(default)]
    pub q: String,
    pub page: Option<usize>,
    pub refresh: Option<String>,
}

fn folder_param(value: Option<&str>) -> MediaFolder {
    MediaFolder::from_param(value.unwrap_or("logos"))
}

pub async fn list(
    State(state): State<AppState>,
    session: CurrentSession,
    Query(params): Query<ListParams>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let folder = folder_param(params.folder.as_deref());
    let force = params.refresh.is_some();
    let blobs = media::list_media(&backends, &state.caches, &state.config.storage, folder, force).await?;
    let matched: Vec<PhotoItem> = media::search_media(&blobs, &params.q)
        .into_iter()
        .map(|b| PhotoItem::from_blob(b, backends.blobs.download_url(b), &state.config.storage))
        .collect();
    let page = paginate(matched, params.page.unwrap_or(1), state.config.server.photos_page_size);

    let ctx = page_context(&state, &session, "photos").await;
    Ok(render(&PhotosTemplate {
        ctx,
        folder: folder.as_str(),
        folder_name: folder.display_name(),
        search: params.q.trim().to_string(),
        page,
    })?
    .into_response())
}

pub async fn detail(
    State(state): State<AppState>,
    session: CurrentSession,
    Path((folder, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let detail = media::photo_detail(
        &backends,
        &state.config.storage,
        MediaFolder::from_param(&folder),
        &name,
    )
    .await?;
    Ok(Json(json!({ "success": true, "photo": detail })))
}

pub async fn url(
    State(state): State<AppState>,
    session: CurrentSession,
    Path((folder, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let detail = media::photo_detail(
        &backends,
        &state.config.storage,
        MediaFolder::from_param(&folder),
        &name,
    )
    .await?;
    Ok(Json(json!({ "success": true, "url": detail.item.url })))
}

/// Multipart upload: one or more `photo_file` parts, an optional `folder`
/// and an optional `filename` overriding the first file's name.
pub async fn upload(
    State(state): State<AppState>,
    session: CurrentSession,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let (files, fields) = read_multipart(multipart).await?;
    let files: Vec<_> = files.into_iter().filter(|f| f.field == "photo_file").collect();
    if files.is_empty() {
        return Err(AdminError::Validation("Aucun fichier fourni".to_string()).into());
    }
    let folder = folder_param(form_value(&fields, "folder"));
    let rename = form_value(&fields, "filename");

    let mut uploaded = Vec::new();
    for (index, file) in files.into_iter().enumerate() {
        let name = match rename {
            Some(name) if index == 0 => name.to_string(),
            _ => file.file_name,
        };
        let result = media::upload_photo(
            &backends,
            &state.caches,
            &state.config.storage,
            folder,
            &name,
            file.bytes,
        )
        .await?;
        uploaded.push(result);
    }
    if uploaded.len() == 1 {
        return Ok(Json(json!(uploaded.remove(0))));
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("{} photos uploadées", uploaded.len()),
        "files": uploaded,
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    session: CurrentSession,
    Path((folder, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    media::delete_photo(
        &backends,
        &state.caches,
        &state.config.storage,
        MediaFolder::from_param(&folder),
        &name,
    )
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Photo '{}' supprimée", name),
    })))
}

#[derive(Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub new_name: String,
}

pub async fn rename(
    State(state): State<AppState>,
    session: CurrentSession,
    Path((folder, name)): Path<(String, String)>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let blob = media::rename_photo(
        &backends,
        &state.caches,
        &state.config.storage,
        MediaFolder::from_param(&folder),
        &name,
        &request.new_name,
    )
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Photo renommée en '{}'", blob.file_name()),
        "new_name": blob.file_name(),
        "full_path": blob.name,
    })))
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub photo_names: Vec<String>,
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    session: CurrentSession,
    Json(request): Json<BulkDeleteRequest>,
) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let result = media::bulk_delete(
        &backends,
        &state.caches,
        &state.config.storage,
        folder_param(request.folder.as_deref()),
        &request.photo_names,
    )
    .await?;
    Ok(Json(json!({
        "success": result.errors == 0,
        "deleted": result.deleted,
        "errors": result.errors,
        "error_details": result.error_details,
    })))
}

pub async fn convert_webp(State(state): State<AppState>, session: CurrentSession) -> ApiResult<Json<Value>> {
    let backends = backends(&state, &session)?;
    let stats = media::convert_photos_to_webp(&backends, &state.caches, &state.config.storage).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
