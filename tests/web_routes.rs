use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use butter_admin::backends::{BackendProvider, MemoryBackends};
use butter_admin::config::Config;
use butter_admin::environment::FirebaseEnv;
use butter_admin::import::MemoryGeocoder;
use butter_admin::revenuecat::{MemorySubscriberApi, RevenueCatService, RevenueCatStore};
use butter_admin::web::{app_router, AppState};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> Result<(Router, Arc<MemoryBackends>)> {
    let mut config = Config::default();
    config.firebase.default_env = "dev".to_string();
    config.admin.password_sha256 = hex::encode(Sha256::digest(b"secret"));
    let config = Arc::new(config);

    let backends = Arc::new(MemoryBackends::new());
    let provider: Arc<dyn BackendProvider> = backends.clone();
    let revenuecat = Arc::new(RevenueCatService::new(
        Arc::new(MemorySubscriberApi::default()),
        Arc::new(RevenueCatStore::open_in_memory()?),
        config.revenuecat.clone(),
    ));
    let state = AppState::new(config, provider, Arc::new(MemoryGeocoder::default()), revenuecat);
    Ok((app_router(state), backends))
}

async fn send(app: &Router, request: Request<Body>) -> Result<Response> {
    Ok(app.clone().oneshot(request).await?)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn login(app: &Router) -> Result<String> {
    let response = send(
        app,
        Request::post("/login")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=admin&password=secret"))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .expect("session cookie");
    Ok(cookie)
}

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let (app, _) = test_app()?;
    let response = send(&app, Request::get("/health").body(Body::empty())?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn anonymous_requests_are_turned_away() -> Result<()> {
    let (app, _) = test_app()?;

    let page = send(&app, Request::get("/restaurants").body(Body::empty())?).await?;
    assert_eq!(page.status(), StatusCode::SEE_OTHER);
    assert_eq!(page.headers()[LOCATION], "/login");

    let api = send(&app, Request::get("/api/env/status").body(Body::empty())?).await?;
    assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(api).await?["success"], false);
    Ok(())
}

#[tokio::test]
async fn wrong_password_renders_the_login_page_again() -> Result<()> {
    let (app, _) = test_app()?;
    let response = send(
        &app,
        Request::post("/login")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=admin&password=nope"))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());
    Ok(())
}

#[tokio::test]
async fn switching_environment_redirects_reads() -> Result<()> {
    let (app, backends) = test_app()?;
    let cookie = login(&app).await?;

    let prod = backends.for_env(FirebaseEnv::Prod)?;
    let fields = json!({"name": "Prod Only", "address": "1 rue A"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    prod.documents.set("restaurants", "PRODONLY", &fields, false).await?;

    let status = send(
        &app,
        Request::get("/api/env/status").header(COOKIE, &cookie).body(Body::empty())?,
    )
    .await?;
    assert_eq!(json_body(status).await?["current"], "dev");

    let missing = send(
        &app,
        Request::get("/api/restaurants/PRODONLY")
            .header(COOKIE, &cookie)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let switched = send(
        &app,
        Request::post("/api/env/switch")
            .header(COOKIE, &cookie)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"env":"prod"}"#))?,
    )
    .await?;
    assert_eq!(switched.status(), StatusCode::OK);
    assert_eq!(json_body(switched).await?["env"], "prod");

    let found = send(
        &app,
        Request::get("/api/restaurants/PRODONLY")
            .header(COOKIE, &cookie)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(found.status(), StatusCode::OK);

    let rejected = send(
        &app,
        Request::post("/api/env/switch")
            .header(COOKIE, &cookie)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"env":"staging"}"#))?,
    )
    .await?;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn confirm_without_pending_import_conflicts() -> Result<()> {
    let (app, _) = test_app()?;
    let cookie = login(&app).await?;
    let response = send(
        &app,
        Request::post("/import/confirm")
            .header(COOKIE, &cookie)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("mode=upsert"))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn restaurant_list_renders_for_the_active_environment() -> Result<()> {
    let (app, backends) = test_app()?;
    let cookie = login(&app).await?;
    let dev = backends.for_env(FirebaseEnv::Dev)?;
    let fields = json!({"name": "Le Bistrot", "address": "1 rue A", "arrondissement": "75011"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    dev.documents.set("restaurants", "BISTROT", &fields, false).await?;

    let response = send(
        &app,
        Request::get("/restaurants?q=bistro").header(COOKIE, &cookie).body(Body::empty())?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await?.to_vec())?;
    assert!(html.contains("Le Bistrot"));
    assert!(html.contains("DEV"));
    Ok(())
}
