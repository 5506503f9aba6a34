use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use super::{backends, flash, form_value, page_context, persist_upload, read_multipart};
use crate::cache::MediaFolder;
use crate::error::{AdminError, Result};
use crate::import::pipeline::{ImportMode, ImportOptions, ImportPipeline, ImportPreview};
use crate::import::PhotoUpload;
use crate::session::FlashLevel;
use crate::web::auth::CurrentSession;
use crate::web::error::PageResult;
use crate::web::state::AppState;
use crate::web::templates::{render, ImportPreviewTemplate, ImportResultTemplate, ImportTemplate, PreviewRow};

const SPREADSHEET_FIELD: &str = "file";

pub async fn page(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let has_pending = session.data.pending_import.is_some();
    let ctx = page_context(&state, &session, "import").await;
    Ok(render(&ImportTemplate {
        ctx,
        collection: state.config.import.collection.clone(),
        default_sheet: state.config.import.default_sheet.clone(),
        has_pending,
    })?
    .into_response())
}

async fn prepare_upload(state: &AppState, session: &CurrentSession, multipart: Multipart) -> Result<Arc<ImportPreview>> {
    let (files, fields) = read_multipart(multipart).await?;
    let mut sheet_file = None;
    let mut photos = Vec::new();
    for file in files {
        if file.field == SPREADSHEET_FIELD && sheet_file.is_none() {
            sheet_file = Some(file);
        } else {
            photos.push(PhotoUpload {
                file_name: file.file_name,
                bytes: file.bytes,
            });
        }
    }
    let sheet_file =
        sheet_file.ok_or_else(|| AdminError::Validation("Aucun fichier sélectionné".to_string()))?;

    let mut options = ImportOptions::from_config(&state.config);
    if let Some(sheet) = form_value(&fields, "sheet") {
        options.sheet = Some(sheet.to_string());
    }
    if form_value(&fields, "dedupe_ids").is_some() {
        options.dedupe_ids = true;
    }

    let path = persist_upload(&sheet_file)?;
    let backends = backends(state, session)?;
    let pipeline = ImportPipeline::new(&backends, &state.config);
    let preview = pipeline
        .prepare(&path, &sheet_file.file_name, photos, &options, state.geocoder.as_ref())
        .await?;
    Ok(Arc::new(preview))
}

pub async fn preview_upload(
    State(state): State<AppState>,
    session: CurrentSession,
    multipart: Multipart,
) -> PageResult<Response> {
    match prepare_upload(&state, &session, multipart).await {
        Ok(preview) => {
            state
                .sessions
                .update(&session.id, |s| s.pending_import = Some(preview))
                .await?;
            Ok(Redirect::to("/import/preview").into_response())
        }
        Err(e) => {
            error!(env = %session.env, "Import preparation failed: {}", e);
            flash(&state, &session, FlashLevel::Error, format!("Erreur de préparation: {}", e)).await;
            Ok(Redirect::to("/import").into_response())
        }
    }
}

pub async fn preview_page(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let Some(preview) = session.data.pending_import.clone() else {
        flash(&state, &session, FlashLevel::Info, "Aucun import en attente").await;
        return Ok(Redirect::to("/import").into_response());
    };
    let rows = preview
        .entries
        .iter()
        .map(|entry| PreviewRow {
            id: entry.record.id.clone(),
            name: entry.record.name().to_string(),
            line: entry.record.line,
            change: entry.change.label(),
            changed_fields: match &entry.change {
                crate::import::Change::Update { changed_fields } => changed_fields.join(", "),
                _ => String::new(),
            },
        })
        .collect();
    let counts = preview.counts();
    let ctx = page_context(&state, &session, "import").await;
    Ok(render(&ImportPreviewTemplate {
        ctx,
        preview,
        counts,
        rows,
    })?
    .into_response())
}

#[derive(Deserialize)]
pub struct ConfirmForm {
    #[serde(default)]
    pub mode: String,
}

pub async fn confirm(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<ConfirmForm>,
) -> PageResult<Response> {
    let Some(preview) = session.data.pending_import.clone() else {
        return Err(AdminError::NoPendingImport.into());
    };
    let mode = ImportMode::parse(&form.mode).unwrap_or_default();
    let backends = backends(&state, &session)?;
    let pipeline = ImportPipeline::new(&backends, &state.config);

    let outcome = match pipeline.commit(&preview, mode).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let mismatch = matches!(e, AdminError::EnvironmentMismatch { .. });
            state
                .sessions
                .update(&session.id, |s| {
                    if mismatch {
                        s.pending_import = None;
                    }
                })
                .await?;
            flash(&state, &session, FlashLevel::Error, format!("Import échoué: {}", e)).await;
            return Ok(Redirect::to("/import").into_response());
        }
    };

    state
        .sessions
        .update(&session.id, |s| s.pending_import = None)
        .await?;
    state.caches.invalidate_restaurants(session.env).await;
    for folder in [MediaFolder::Logos, MediaFolder::Photos] {
        state.caches.invalidate_media(session.env, folder).await;
    }
    info!(env = %session.env, imported = outcome.imported, "Import confirmed");
    flash(
        &state,
        &session,
        FlashLevel::Success,
        format!(
            "Import réussi sur {} : {} restaurants écrits, {} échecs",
            session.env.label(),
            outcome.imported,
            outcome.failed
        ),
    )
    .await;

    let ctx = page_context(&state, &session, "import").await;
    Ok(render(&ImportResultTemplate { ctx, outcome })?.into_response())
}

pub async fn cancel(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    state
        .sessions
        .update(&session.id, |s| s.pending_import = None)
        .await?;
    flash(&state, &session, FlashLevel::Info, "Import annulé").await;
    Ok(Redirect::to("/import").into_response())
}
