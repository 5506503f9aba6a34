use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::{backends, page_context};
use crate::cache::MediaFolder;
use crate::environment::FirebaseEnv;
use crate::media::list_media;
use crate::restaurants::load_restaurants;
use crate::web::auth::CurrentSession;
use crate::web::error::PageResult;
use crate::web::state::AppState;
use crate::web::templates::{render, HomeTemplate};

/// Dashboard. Counting failures are logged and shown as zero so a broken
/// project can still be switched away from.
pub async fn home(State(state): State<AppState>, session: CurrentSession) -> PageResult<Response> {
    let ctx = page_context(&state, &session, "home").await;
    let environments = FirebaseEnv::ALL
        .iter()
        .map(|env| state.environments.status(*env))
        .collect();

    let (mut restaurant_count, mut onboarding_count, mut photo_count, mut logo_count) = (0, 0, 0, 0);
    match backends(&state, &session) {
        Ok(backends) => {
            let config = &state.config;
            match load_restaurants(&backends, &state.caches, &config.import.collection, false).await {
                Ok(docs) => restaurant_count = docs.len(),
                Err(e) => warn!("Restaurant count unavailable: {}", e),
            }
            match backends.documents.list(&config.import.onboarding_collection).await {
                Ok(docs) => onboarding_count = docs.len(),
                Err(e) => warn!("Onboarding count unavailable: {}", e),
            }
            for (folder, count) in [
                (MediaFolder::Photos, &mut photo_count),
                (MediaFolder::Logos, &mut logo_count),
            ] {
                match list_media(&backends, &state.caches, &config.storage, folder, false).await {
                    Ok(blobs) => *count = blobs.len(),
                    Err(e) => warn!(folder = folder.as_str(), "Media count unavailable: {}", e),
                }
            }
        }
        Err(e) => warn!(env = %session.env, "Backends unavailable: {}", e),
    }

    Ok(render(&HomeTemplate {
        ctx,
        environments,
        restaurant_count,
        onboarding_count,
        photo_count,
        logo_count,
    })?
    .into_response())
}
