use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::environment::FirebaseEnv;
use crate::error::{AdminError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "butter_admin.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub firebase: FirebaseConfig,
    pub storage: StorageConfig,
    pub import: ImportConfig,
    pub revenuecat: RevenueCatConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub session_ttl_minutes: u64,
    pub log_dir: String,
    pub restaurants_page_size: usize,
    pub photos_page_size: usize,
    pub users_page_size: usize,
    pub restaurants_cache_ttl_secs: u64,
    pub photos_cache_ttl_secs: u64,
    pub users_cache_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            session_ttl_minutes: 12 * 60,
            log_dir: "logs".to_string(),
            restaurants_page_size: 50,
            photos_page_size: 60,
            users_page_size: 50,
            restaurants_cache_ttl_secs: 300,
            photos_cache_ttl_secs: 300,
            users_cache_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    /// Hex encoded SHA-256 of the admin password.
    pub password_sha256: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password_sha256: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    pub default_env: String,
    pub credentials_dir: PathBuf,
    pub dev: FirebaseProjectConfig,
    pub prod: FirebaseProjectConfig,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            default_env: "prod".to_string(),
            credentials_dir: PathBuf::from("firebase_credentials"),
            dev: FirebaseProjectConfig {
                project_id: "butter-def".to_string(),
                service_account: "serviceAccountKey.dev.json".to_string(),
                bucket: "butter-def.firebasestorage.app".to_string(),
            },
            prod: FirebaseProjectConfig {
                project_id: "butter-vdef".to_string(),
                service_account: "serviceAccountKey.prod.json".to_string(),
                bucket: "butter-vdef.firebasestorage.app".to_string(),
            },
        }
    }
}

impl FirebaseConfig {
    pub fn project(&self, env: FirebaseEnv) -> &FirebaseProjectConfig {
        match env {
            FirebaseEnv::Dev => &self.dev,
            FirebaseEnv::Prod => &self.prod,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FirebaseProjectConfig {
    /// Left empty, it is taken from the bucket name.
    #[serde(default)]
    pub project_id: String,
    pub service_account: String,
    pub bucket: String,
}

impl FirebaseProjectConfig {
    pub fn project_id(&self) -> &str {
        if !self.project_id.is_empty() {
            return &self.project_id;
        }
        self.bucket.split('.').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub logos_folder: String,
    pub photos_folder: String,
    pub menus_folder: String,
    pub heavy_image_bytes: u64,
    pub very_heavy_image_bytes: u64,
    pub max_image_bytes: u64,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            logos_folder: "Logos/".to_string(),
            photos_folder: "Photos restaurants/".to_string(),
            menus_folder: "Menus/".to_string(),
            heavy_image_bytes: 500 * 1024,
            very_heavy_image_bytes: 2 * 1024 * 1024,
            max_image_bytes: 5 * 1024 * 1024,
            max_width: 1920,
            max_height: 1920,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub collection: String,
    pub logs_collection: String,
    pub onboarding_collection: String,
    pub favorites_collection: String,
    pub default_sheet: String,
    pub batch_size: usize,
    pub dedupe_ids: bool,
    pub backup_dir: PathBuf,
    pub input_dir: PathBuf,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_max_retries: u32,
    pub geocoder_throttle_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            collection: "restaurants".to_string(),
            logs_collection: "import logs".to_string(),
            onboarding_collection: "onboarding_restaurants".to_string(),
            favorites_collection: "favorites".to_string(),
            default_sheet: "Feuil1".to_string(),
            batch_size: 400,
            dedupe_ids: false,
            backup_dir: PathBuf::from("media/exports/backups"),
            input_dir: PathBuf::from("media/input"),
            geocoder_url: "https://nominatim.openstreetmap.org/search".to_string(),
            geocoder_user_agent: "RestaurantImportScript/1.0".to_string(),
            geocoder_max_retries: 3,
            geocoder_throttle_ms: 1100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevenueCatConfig {
    pub api_key_v1: String,
    pub api_key_v2: String,
    pub project_id: String,
    pub v1_url: String,
    pub v2_url: String,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub dashboard_cache_ttl_secs: u64,
    pub sqlite_path: PathBuf,
}

impl Default for RevenueCatConfig {
    fn default() -> Self {
        Self {
            api_key_v1: String::new(),
            api_key_v2: String::new(),
            project_id: "proj4d1b1dce".to_string(),
            v1_url: "https://api.revenuecat.com/v1/subscribers".to_string(),
            v2_url: "https://api.revenuecat.com/v2".to_string(),
            batch_size: 10,
            batch_delay_ms: 1100,
            dashboard_cache_ttl_secs: 600,
            sqlite_path: PathBuf::from("data/revenuecat.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_delay_ms: 500,
        }
    }
}

impl Config {
    /// Loads `butter_admin.toml` (or `$BUTTER_CONFIG`) and applies environment overrides.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var("BUTTER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            warn!("Config file '{}' not found, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(path)
            .map_err(|e| AdminError::Config(format!("Failed to read config file '{}': {}", path, e)))?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(env) = std::env::var("FIREBASE_ENV") {
            self.firebase.default_env = env;
        }
        if let Ok(key) = std::env::var("REVENUECAT_API_KEY") {
            self.revenuecat.api_key_v1 = key;
        }
        if let Ok(key) = std::env::var("REVENUECAT_API_KEY_V2") {
            self.revenuecat.api_key_v2 = key;
        }
        if let Ok(hash) = std::env::var("BUTTER_ADMIN_PASSWORD_SHA256") {
            self.admin.password_sha256 = hash;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Process-wide default environment; invalid values fall back to prod.
    pub fn default_env(&self) -> FirebaseEnv {
        match FirebaseEnv::parse(&self.firebase.default_env) {
            Some(env) => env,
            None => {
                warn!(
                    "Invalid FIREBASE_ENV '{}', falling back to 'prod'",
                    self.firebase.default_env
                );
                FirebaseEnv::Prod
            }
        }
    }

    pub fn service_account_path(&self, env: FirebaseEnv) -> PathBuf {
        self.firebase
            .credentials_dir
            .join(&self.firebase.project(env).service_account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.import.collection, "restaurants");
        assert_eq!(config.import.batch_size, 400);
        assert_eq!(config.storage.photos_folder, "Photos restaurants/");
        assert_eq!(config.revenuecat.batch_size, 10);
        assert_eq!(config.default_env(), FirebaseEnv::Prod);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [firebase]
            default_env = "dev"

            [firebase.dev]
            service_account = "dev.json"
            bucket = "dev-bucket"

            [import]
            batch_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.default_env(), FirebaseEnv::Dev);
        assert_eq!(config.firebase.dev.bucket, "dev-bucket");
        assert_eq!(config.import.batch_size, 50);
        assert_eq!(config.import.logs_collection, "import logs");
        assert!(config
            .service_account_path(FirebaseEnv::Dev)
            .ends_with("dev.json"));
    }

    #[test]
    fn invalid_default_env_falls_back_to_prod() {
        let mut config = Config::default();
        config.firebase.default_env = "staging".to_string();
        assert_eq!(config.default_env(), FirebaseEnv::Prod);
    }
}
