use std::sync::Arc;
use std::time::Duration;

use crate::backends::{BackendProvider, EnvBackends};
use crate::cache::EnvCaches;
use crate::config::Config;
use crate::environment::{Environments, FirebaseEnv};
use crate::error::Result;
use crate::import::Geocoder;
use crate::revenuecat::RevenueCatService;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub environments: Arc<Environments>,
    pub backends: Arc<dyn BackendProvider>,
    pub sessions: SessionStore,
    pub caches: EnvCaches,
    pub geocoder: Arc<dyn Geocoder>,
    pub revenuecat: Arc<RevenueCatService>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        backends: Arc<dyn BackendProvider>,
        geocoder: Arc<dyn Geocoder>,
        revenuecat: Arc<RevenueCatService>,
    ) -> Self {
        let ttl = Duration::from_secs(config.server.session_ttl_minutes * 60);
        Self {
            environments: Arc::new(Environments::from_config(&config)),
            sessions: SessionStore::new(ttl),
            caches: EnvCaches::new(&config.server),
            config,
            backends,
            geocoder,
            revenuecat,
        }
    }

    /// Clients of `env`. Every handler goes through here with the session's
    /// environment.
    pub fn backends_for(&self, env: FirebaseEnv) -> Result<Arc<EnvBackends>> {
        self.backends.for_env(env)
    }
}
