use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::environment::FirebaseEnv;
use crate::error::{AdminError, Result};
use crate::import::pipeline::ImportPreview;
use crate::onboarding::OnboardingPreview;

pub const SESSION_COOKIE: &str = "butter_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn css_class(&self) -> &'static str {
        match self.level {
            FlashLevel::Success => "flash-success",
            FlashLevel::Info => "flash-info",
            FlashLevel::Warning => "flash-warning",
            FlashLevel::Error => "flash-error",
        }
    }
}

/// Server-side state attached to one browser session.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub authenticated: bool,
    pub username: Option<String>,
    pub firebase_env: Option<FirebaseEnv>,
    pub flashes: Vec<Flash>,
    pub pending_import: Option<Arc<ImportPreview>>,
    pub pending_onboarding: Option<Arc<OnboardingPreview>>,
}

/// Sessions live in memory and expire after a period of inactivity.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<String, SessionData>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(10_000)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), SessionData::default()).await;
        id
    }

    pub async fn get(&self, id: &str) -> Option<SessionData> {
        self.sessions.get(id).await
    }

    /// Applies `f` to the session and stores the result. Updates of one
    /// session are serialized, so concurrent requests never lose a write.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<SessionData>
    where
        F: FnOnce(&mut SessionData),
    {
        let outcome = self
            .sessions
            .entry_by_ref(id)
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) => {
                        let mut session = entry.into_value();
                        f(&mut session);
                        Op::Put(session)
                    }
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        match outcome {
            CompResult::ReplacedWith(entry) | CompResult::Inserted(entry) => Ok(entry.into_value()),
            _ => Err(AdminError::NotFound(format!("session {}", id))),
        }
    }

    pub async fn flash(&self, id: &str, level: FlashLevel, message: impl Into<String>) {
        let message = message.into();
        let _ = self
            .update(id, |s| s.flashes.push(Flash { level, message }))
            .await;
    }

    /// Returns and clears pending flash messages.
    pub async fn take_flashes(&self, id: &str) -> Vec<Flash> {
        let mut taken = Vec::new();
        let _ = self
            .update(id, |s| taken = std::mem::take(&mut s.flashes))
            .await;
        taken
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.invalidate(id).await;
    }
}
