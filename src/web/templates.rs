use askama::Template;
use axum::response::Html;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::environment::{EnvironmentStatus, FirebaseEnv};
use crate::error::Result;
use crate::import::pipeline::{ImportOutcome, ImportPreview, PreviewCounts};
use crate::media::{MediaInfo, PhotoItem};
use crate::notifications::Recipient;
use crate::onboarding::{OnboardingPreview, OnboardingStats};
use crate::pagination::Page;
use crate::restaurants::RestaurantRow;
use crate::revenuecat::{DashboardMetrics, ScanProgress, StoredStatus};
use crate::session::Flash;
use crate::users::{UserEntry, UserMetrics};

pub fn render<T: Template>(template: &T) -> Result<Html<String>> {
    Ok(Html(template.render()?))
}

/// Layout data shared by every authenticated page.
pub struct PageContext {
    pub env: FirebaseEnv,
    pub env_label: &'static str,
    pub username: String,
    pub flashes: Vec<Flash>,
    pub active: &'static str,
}

impl PageContext {
    pub fn is_prod(&self) -> bool {
        self.env == FirebaseEnv::Prod
    }
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub status: u16,
    pub message: String,
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub ctx: PageContext,
    pub environments: Vec<EnvironmentStatus>,
    pub restaurant_count: usize,
    pub onboarding_count: usize,
    pub photo_count: usize,
    pub logo_count: usize,
}

#[derive(Template)]
#[template(path = "restaurants.html")]
pub struct RestaurantsTemplate {
    pub ctx: PageContext,
    pub page: Page<RestaurantRow>,
    pub search: String,
    pub missing_photos: bool,
    pub missing_logos: bool,
    /// Query string repeated on pagination links.
    pub filters: String,
}

#[derive(Template)]
#[template(path = "restaurant_detail.html")]
pub struct RestaurantDetailTemplate {
    pub ctx: PageContext,
    pub id: String,
    pub name: String,
    pub fields: BTreeMap<String, String>,
    pub media: MediaInfo,
}

#[derive(Template)]
#[template(path = "restaurant_form.html")]
pub struct RestaurantFormTemplate {
    pub ctx: PageContext,
    pub title: String,
    pub action: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Template)]
#[template(path = "import.html")]
pub struct ImportTemplate {
    pub ctx: PageContext,
    pub collection: String,
    pub default_sheet: String,
    pub has_pending: bool,
}

pub struct PreviewRow {
    pub id: String,
    pub name: String,
    pub line: usize,
    pub change: &'static str,
    pub changed_fields: String,
}

#[derive(Template)]
#[template(path = "import_preview.html")]
pub struct ImportPreviewTemplate {
    pub ctx: PageContext,
    pub preview: Arc<ImportPreview>,
    pub counts: PreviewCounts,
    pub rows: Vec<PreviewRow>,
}

#[derive(Template)]
#[template(path = "import_result.html")]
pub struct ImportResultTemplate {
    pub ctx: PageContext,
    pub outcome: ImportOutcome,
}

pub struct OnboardingRow {
    pub id: String,
    pub name: String,
    pub lieu: String,
    pub specialite: String,
}

#[derive(Template)]
#[template(path = "onboarding.html")]
pub struct OnboardingTemplate {
    pub ctx: PageContext,
    pub rows: Vec<OnboardingRow>,
    pub stats: OnboardingStats,
    pub lieu: String,
    pub has_pending: bool,
}

#[derive(Template)]
#[template(path = "onboarding_preview.html")]
pub struct OnboardingPreviewTemplate {
    pub ctx: PageContext,
    pub preview: Arc<OnboardingPreview>,
}

#[derive(Template)]
#[template(path = "onboarding_detail.html")]
pub struct OnboardingDetailTemplate {
    pub ctx: PageContext,
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Template)]
#[template(path = "photos.html")]
pub struct PhotosTemplate {
    pub ctx: PageContext,
    pub folder: &'static str,
    pub folder_name: &'static str,
    pub search: String,
    pub page: Page<PhotoItem>,
}

#[derive(Template)]
#[template(path = "notifications.html")]
pub struct NotificationsTemplate {
    pub ctx: PageContext,
    pub recipients: Vec<Recipient>,
}

#[derive(Template)]
#[template(path = "users.html")]
pub struct UsersTemplate {
    pub ctx: PageContext,
    pub page: Page<UserEntry>,
    pub metrics: UserMetrics,
    pub search: String,
}

#[derive(Template)]
#[template(path = "revenuecat.html")]
pub struct RevenueCatTemplate {
    pub ctx: PageContext,
    pub metrics: Arc<DashboardMetrics>,
    pub statuses: Vec<StoredStatus>,
    pub progress: ScanProgress,
}
