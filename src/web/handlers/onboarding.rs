use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use super::{backends, flash, form_value, page_context, persist_upload, read_multipart};
use crate::error::{AdminError, Result};
use crate::onboarding::{self, OnboardingPreview, CSV_FILE_NAME};
use crate::restaurants::display_fields;
use crate::session::FlashLevel;
use crate::web::auth::CurrentSession;
use crate::web::error::PageResult;
use crate::web::state::AppState;
use crate::web::templates::{
    render, OnboardingDetailTemplate, OnboardingPreviewTemplate, OnboardingRow, OnboardingTemplate,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub lieu: String,
}

pub async fn list(
    State(state): State<AppState>,
    session: CurrentSession,
    Query(params): Query<ListParams>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let lieu = params.lieu.trim().to_string();
    let (docs, stats) = onboarding::list(
        backends.documents.as_ref(),
        &state.config.import.onboarding_collection,
        Some(lieu.as_str()),
    )
    .await?;
    let rows = docs
        .iter()
        .map(|d| OnboardingRow {
            id: d.id.clone(),
            name: d.get_str("name").unwrap_or_default().to_string(),
            lieu: d.get_str("lieu").unwrap_or_default().to_string(),
            specialite: d.get_str("specialite").unwrap_or_default().to_string(),
        })
        .collect();
    let has_pending = session.data.pending_onboarding.is_some();
    let ctx = page_context(&state, &session, "onboarding").await;
    Ok(render(&OnboardingTemplate {
        ctx,
        rows,
        stats,
        lieu,
        has_pending,
    })?
    .into_response())
}

async fn prepare_upload(session: &CurrentSession, multipart: Multipart) -> Result<OnboardingPreview> {
    let (files, fields) = read_multipart(multipart).await?;
    let file = files
        .into_iter()
        .next()
        .ok_or_else(|| AdminError::Validation("Aucun fichier sélectionné".to_string()))?;
    let path = persist_upload(&file)?;
    onboarding::prepare(session.env, &path, &file.file_name, form_value(&fields, "sheet"))
}

pub async fn upload(
    State(state): State<AppState>,
    session: CurrentSession,
    multipart: Multipart,
) -> PageResult<Response> {
    match prepare_upload(&session, multipart).await {
        Ok(preview) => {
            let preview = Arc::new(preview);
            state
                .sessions
                .update(&session.id, |s| s.pending_onboarding = Some(preview))
                .await?;
            Ok(Redirect::to("/onboarding/preview").into_response())
        }
        Err(e) => {
            error!(env = %session.env, "Onboarding preparation failed: {}", e);
            flash(&state, &session, FlashLevel::Error, format!("Fichier refusé: {}", e)).await;
            Ok(Redirect::to("/onboarding").into_response())
        }
    }
}

pub async fn preview_page(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let Some(preview) = session.data.pending_onboarding.clone() else {
        flash(&state, &session, FlashLevel::Info, "Aucun import onboarding en attente").await;
        return Ok(Redirect::to("/onboarding").into_response());
    };
    let ctx = page_context(&state, &session, "onboarding").await;
    Ok(render(&OnboardingPreviewTemplate { ctx, preview })?.into_response())
}

pub async fn confirm(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let Some(preview) = session.data.pending_onboarding.clone() else {
        return Err(AdminError::NoPendingImport.into());
    };
    let backends = backends(&state, &session)?;
    let result = onboarding::confirm(
        &backends,
        &state.config.import.onboarding_collection,
        state.config.import.batch_size,
        &preview,
    )
    .await;
    state
        .sessions
        .update(&session.id, |s| s.pending_onboarding = None)
        .await?;

    match result {
        Ok(outcome) => {
            let level = if outcome.success { FlashLevel::Success } else { FlashLevel::Warning };
            flash(
                &state,
                &session,
                level,
                format!(
                    "Import réussi sur {} : {} restaurants importés ({} anciens supprimés).",
                    outcome.env.label(),
                    outcome.imported,
                    outcome.deleted
                ),
            )
            .await;
        }
        Err(e) => flash(&state, &session, FlashLevel::Error, format!("Import échoué: {}", e)).await,
    }
    Ok(Redirect::to("/onboarding").into_response())
}

pub async fn cancel(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    state
        .sessions
        .update(&session.id, |s| s.pending_onboarding = None)
        .await?;
    Ok(Redirect::to("/onboarding").into_response())
}

pub async fn detail(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let doc = onboarding::get(backends.documents.as_ref(), &state.config.import.onboarding_collection, &id).await?;
    let ctx = page_context(&state, &session, "onboarding").await;
    Ok(render(&OnboardingDetailTemplate {
        ctx,
        fields: display_fields(&doc),
        id: doc.id,
    })?
    .into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(id): Path<String>,
) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    onboarding::delete(backends.documents.as_ref(), &state.config.import.onboarding_collection, &id).await?;
    flash(&state, &session, FlashLevel::Success, format!("{} supprimé", id)).await;
    Ok(Redirect::to("/onboarding").into_response())
}

pub async fn export(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let backends = backends(&state, &session)?;
    let (docs, _) = onboarding::list(
        backends.documents.as_ref(),
        &state.config.import.onboarding_collection,
        None,
    )
    .await?;
    let body = onboarding::export_csv(&docs)?;
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", CSV_FILE_NAME),
            ),
        ],
        body,
    )
        .into_response())
}
