use thiserror::Error;

use crate::environment::FirebaseEnv;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Template rendering failed: {0}")]
    Template(#[from] askama::Error),

    #[error("Token signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service account not found: {0}")]
    MissingCredentials(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Preview was prepared against {prepared} but the active environment is {active}")]
    EnvironmentMismatch {
        prepared: FirebaseEnv,
        active: FirebaseEnv,
    },

    #[error("No pending import to confirm")]
    NoPendingImport,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl AdminError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        AdminError::Api {
            status,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;
