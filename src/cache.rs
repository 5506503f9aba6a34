use moka::future::Cache;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::environment::FirebaseEnv;
use crate::firestore::Document;
use crate::storage::BlobInfo;
use crate::users::UserEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFolder {
    Logos,
    Photos,
}

impl MediaFolder {
    /// `logos` selects the logo folder; anything else means restaurant photos.
    pub fn from_param(value: &str) -> Self {
        if value == "logos" {
            MediaFolder::Logos
        } else {
            MediaFolder::Photos
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFolder::Logos => "logos",
            MediaFolder::Photos => "photos",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MediaFolder::Logos => "Logos",
            MediaFolder::Photos => "Photos restaurants",
        }
    }
}

/// Listings cached per environment. Keys always carry the environment so a
/// dev listing can never be served to a prod session.
#[derive(Clone)]
pub struct EnvCaches {
    pub restaurants: Cache<FirebaseEnv, Arc<Vec<Document>>>,
    pub photos: Cache<(FirebaseEnv, MediaFolder), Arc<Vec<BlobInfo>>>,
    pub missing_media: Cache<(FirebaseEnv, MediaFolder), Arc<HashSet<String>>>,
    pub users: Cache<FirebaseEnv, Arc<Vec<UserEntry>>>,
}

impl EnvCaches {
    pub fn new(server: &ServerConfig) -> Self {
        Self {
            restaurants: Cache::builder()
                .time_to_live(Duration::from_secs(server.restaurants_cache_ttl_secs))
                .build(),
            photos: Cache::builder()
                .time_to_live(Duration::from_secs(server.photos_cache_ttl_secs))
                .build(),
            missing_media: Cache::builder()
                .time_to_live(Duration::from_secs(server.photos_cache_ttl_secs))
                .build(),
            users: Cache::builder()
                .time_to_live(Duration::from_secs(server.users_cache_ttl_secs))
                .build(),
        }
    }

    pub fn invalidate_all(&self) {
        self.restaurants.invalidate_all();
        self.photos.invalidate_all();
        self.missing_media.invalidate_all();
        self.users.invalidate_all();
    }

    /// Drops everything derived from one environment's restaurants or media.
    pub async fn invalidate_restaurants(&self, env: FirebaseEnv) {
        self.restaurants.invalidate(&env).await;
        for folder in [MediaFolder::Logos, MediaFolder::Photos] {
            self.missing_media.invalidate(&(env, folder)).await;
        }
    }

    pub async fn invalidate_media(&self, env: FirebaseEnv, folder: MediaFolder) {
        self.photos.invalidate(&(env, folder)).await;
        self.missing_media.invalidate(&(env, folder)).await;
    }
}
