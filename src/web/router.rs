use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{AdminError, Result};
use crate::web::handlers::{
    auth, environment, home, import, notifications, onboarding, photos, restaurants, revenuecat, users,
};
use crate::web::state::AppState;

/// Spreadsheets plus a folder of photos can be large.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(auth::health))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/", get(home::home))
        .route("/api/env/status", get(environment::status))
        .route("/api/env/switch", post(environment::switch))
        // Restaurants
        .route("/restaurants", get(restaurants::list))
        .route("/restaurants/new", get(restaurants::new_form).post(restaurants::create))
        .route("/restaurants/:id", get(restaurants::detail))
        .route("/restaurants/:id/edit", get(restaurants::edit_form).post(restaurants::update))
        .route("/restaurants/:id/delete", post(restaurants::delete))
        .route("/api/restaurants/:id", get(restaurants::json))
        // Import
        .route("/import", get(import::page))
        .route("/import/preview", get(import::preview_page).post(import::preview_upload))
        .route("/import/confirm", post(import::confirm))
        .route("/import/cancel", post(import::cancel))
        // Onboarding
        .route("/onboarding", get(onboarding::list))
        .route("/onboarding/upload", post(onboarding::upload))
        .route("/onboarding/preview", get(onboarding::preview_page))
        .route("/onboarding/confirm", post(onboarding::confirm))
        .route("/onboarding/cancel", post(onboarding::cancel))
        .route("/onboarding/export.csv", get(onboarding::export))
        .route("/onboarding/:id", get(onboarding::detail))
        .route("/onboarding/:id/delete", post(onboarding::delete))
        // Photos
        .route("/photos", get(photos::list))
        .route("/api/photos/upload", post(photos::upload))
        .route("/api/photos/bulk-delete", post(photos::bulk_delete))
        .route("/api/photos/convert-webp", post(photos::convert_webp))
        .route("/api/photos/:folder/:name", get(photos::detail))
        .route("/api/photos/:folder/:name/url", get(photos::url))
        .route("/api/photos/:folder/:name/delete", post(photos::delete))
        .route("/api/photos/:folder/:name/rename", post(photos::rename))
        // Notifications and users
        .route("/notifications", get(notifications::page))
        .route("/api/notifications/send", post(notifications::send))
        .route("/users", get(users::list))
        // RevenueCat
        .route("/revenuecat", get(revenuecat::dashboard))
        .route("/api/revenuecat/scan", post(revenuecat::start_scan))
        .route("/api/revenuecat/scan/status", get(revenuecat::scan_status))
        .route("/api/revenuecat/users/:uid/refresh", post(revenuecat::refresh_user))
        .nest_service("/static", ServeDir::new("static"))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state)
}

/// Binds and serves the console until the process stops.
pub async fn start_server(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.bind, state.config.server.port)
        .parse()
        .map_err(|e| AdminError::Config(format!("Invalid bind address: {}", e)))?;
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Admin console running on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
