pub mod auth;
pub mod environment;
pub mod home;
pub mod import;
pub mod notifications;
pub mod onboarding;
pub mod photos;
pub mod restaurants;
pub mod revenuecat;
pub mod users;

use axum::extract::Multipart;
use std::sync::Arc;

use crate::backends::EnvBackends;
use crate::error::{AdminError, Result};
use crate::session::FlashLevel;
use crate::web::auth::CurrentSession;
use crate::web::state::AppState;
use crate::web::templates::PageContext;

/// Layout data for a page; consumes the session's pending flashes.
pub async fn page_context(state: &AppState, session: &CurrentSession, active: &'static str) -> PageContext {
    PageContext {
        env: session.env,
        env_label: session.env.label(),
        username: session.data.username.clone().unwrap_or_default(),
        flashes: state.sessions.take_flashes(&session.id).await,
        active,
    }
}

pub fn backends(state: &AppState, session: &CurrentSession) -> Result<Arc<EnvBackends>> {
    state.backends_for(session.env)
}

pub async fn flash(state: &AppState, session: &CurrentSession, level: FlashLevel, message: impl Into<String>) {
    state.sessions.flash(&session.id, level, message).await;
}

/// One uploaded file of a multipart form.
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Reads a multipart body into its files and its plain text fields.
pub async fn read_multipart(mut multipart: Multipart) -> Result<(Vec<UploadedFile>, Vec<(String, String)>)> {
    let mut files = Vec::new();
    let mut fields = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AdminError::Validation(format!("Formulaire invalide: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AdminError::Validation(format!("Lecture du fichier impossible: {}", e)))?;
        match file_name {
            Some(file_name) if !file_name.is_empty() => files.push(UploadedFile {
                field: name,
                file_name,
                bytes: bytes.to_vec(),
            }),
            Some(_) => {}
            None => fields.push((name, String::from_utf8_lossy(&bytes).into_owned())),
        }
    }
    Ok((files, fields))
}

pub fn form_value<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// Keeps an upload on disk for the sheet readers, which work from paths.
pub fn persist_upload(file: &UploadedFile) -> Result<tempfile::TempPath> {
    let extension = std::path::Path::new(&file.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new().suffix(&extension).tempfile()?;
    std::io::Write::write_all(&mut temp, &file.bytes)?;
    Ok(temp.into_temp_path())
}
