//! Dev/prod environment selection.
//!
//! Every remote call is made against exactly one Firebase project. The active
//! project is a per-session choice; when a session has none, the process
//! default (`FIREBASE_ENV`, else prod) applies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

use crate::cache::EnvCaches;
use crate::config::Config;
use crate::error::{AdminError, Result};
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirebaseEnv {
    Dev,
    Prod,
}

impl FirebaseEnv {
    pub const ALL: [FirebaseEnv; 2] = [FirebaseEnv::Dev, FirebaseEnv::Prod];

    /// Accepts `dev`/`prod` in any case, surrounding whitespace ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" => Some(FirebaseEnv::Dev),
            "prod" => Some(FirebaseEnv::Prod),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FirebaseEnv::Dev => "dev",
            FirebaseEnv::Prod => "prod",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FirebaseEnv::Dev => "DEV",
            FirebaseEnv::Prod => "PROD",
        }
    }
}

impl fmt::Display for FirebaseEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of one Firebase project.
#[derive(Debug, Clone)]
pub struct EnvironmentProfile {
    pub env: FirebaseEnv,
    pub project_id: String,
    pub service_account_path: PathBuf,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub env: FirebaseEnv,
    pub label: &'static str,
    pub file_exists: bool,
    pub file_path: String,
    pub project_id: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct Environments {
    default_env: FirebaseEnv,
    dev: EnvironmentProfile,
    prod: EnvironmentProfile,
}

impl Environments {
    pub fn from_config(config: &Config) -> Self {
        let profile = |env: FirebaseEnv| {
            let project = config.firebase.project(env);
            EnvironmentProfile {
                env,
                project_id: project.project_id().to_string(),
                service_account_path: config.service_account_path(env),
                bucket: project.bucket.clone(),
            }
        };
        Self {
            default_env: config.default_env(),
            dev: profile(FirebaseEnv::Dev),
            prod: profile(FirebaseEnv::Prod),
        }
    }

    pub fn default_env(&self) -> FirebaseEnv {
        self.default_env
    }

    /// The session's choice when valid, the process default otherwise.
    pub fn resolve(&self, session_value: Option<&str>) -> FirebaseEnv {
        session_value
            .and_then(FirebaseEnv::parse)
            .unwrap_or(self.default_env)
    }

    pub fn profile(&self, env: FirebaseEnv) -> &EnvironmentProfile {
        match env {
            FirebaseEnv::Dev => &self.dev,
            FirebaseEnv::Prod => &self.prod,
        }
    }

    pub fn status(&self, env: FirebaseEnv) -> EnvironmentStatus {
        let profile = self.profile(env);
        EnvironmentStatus {
            env,
            label: env.label(),
            file_exists: profile.service_account_path.exists(),
            file_path: profile.service_account_path.display().to_string(),
            project_id: profile.project_id.clone(),
            bucket: profile.bucket.clone(),
        }
    }
}

/// Switches a session to `requested`.
///
/// Invalid values leave the session untouched. On success every cached
/// listing (both environments) is dropped, along with any pending preview that
/// was prepared against the other project.
pub async fn switch(
    sessions: &SessionStore,
    caches: &EnvCaches,
    session_id: &str,
    requested: &str,
) -> Result<FirebaseEnv> {
    let env = FirebaseEnv::parse(requested).ok_or_else(|| {
        AdminError::Validation(format!(
            "Invalid environment '{}'. Use 'dev' or 'prod'.",
            requested
        ))
    })?;

    sessions
        .update(session_id, |session| {
            session.firebase_env = Some(env);
            if session
                .pending_import
                .as_ref()
                .is_some_and(|p| p.env != env)
            {
                session.pending_import = None;
            }
            if session
                .pending_onboarding
                .as_ref()
                .is_some_and(|p| p.env != env)
            {
                session.pending_onboarding = None;
            }
        })
        .await?;

    caches.invalidate_all();
    crate::metrics::environment_switched(env.as_str());
    info!(env = %env, "Firebase environment switched");
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environments(default_env: &str) -> Environments {
        let mut config = Config::default();
        config.firebase.default_env = default_env.to_string();
        Environments::from_config(&config)
    }

    #[test]
    fn parse_accepts_only_dev_and_prod() {
        assert_eq!(FirebaseEnv::parse("dev"), Some(FirebaseEnv::Dev));
        assert_eq!(FirebaseEnv::parse(" PROD "), Some(FirebaseEnv::Prod));
        assert_eq!(FirebaseEnv::parse("staging"), None);
        assert_eq!(FirebaseEnv::parse(""), None);
    }

    #[test]
    fn resolve_prefers_valid_session_value() {
        let envs = environments("prod");
        assert_eq!(envs.resolve(Some("dev")), FirebaseEnv::Dev);
        assert_eq!(envs.resolve(Some("bogus")), FirebaseEnv::Prod);
        assert_eq!(envs.resolve(None), FirebaseEnv::Prod);
    }

    #[test]
    fn project_id_falls_back_to_the_bucket_name() {
        let mut config = Config::default();
        config.firebase.dev.project_id.clear();
        config.firebase.dev.bucket = "butter-staging.appspot.com".to_string();
        let envs = Environments::from_config(&config);
        assert_eq!(envs.profile(FirebaseEnv::Dev).project_id, "butter-staging");
    }

    #[test]
    fn resolve_uses_process_default() {
        let envs = environments("dev");
        assert_eq!(envs.resolve(None), FirebaseEnv::Dev);
    }

    #[test]
    fn profiles_are_distinct() {
        let envs = environments("prod");
        let dev = envs.profile(FirebaseEnv::Dev);
        let prod = envs.profile(FirebaseEnv::Prod);
        assert_ne!(dev.service_account_path, prod.service_account_path);
        assert_ne!(dev.bucket, prod.bucket);
        assert_eq!(dev.project_id, "butter-def");
        assert_eq!(prod.project_id, "butter-vdef");
        assert!(!envs.status(FirebaseEnv::Dev).file_exists);
        assert_eq!(envs.status(FirebaseEnv::Prod).label, "PROD");
    }
}
