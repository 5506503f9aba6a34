use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::error::AdminError;
use crate::web::templates::{render, ErrorTemplate};

pub fn status_for(err: &AdminError) -> StatusCode {
    match err {
        AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        AdminError::Validation(_) | AdminError::Spreadsheet(_) | AdminError::Csv(_) => {
            StatusCode::BAD_REQUEST
        }
        AdminError::EnvironmentMismatch { .. } | AdminError::NoPendingImport => StatusCode::CONFLICT,
        AdminError::Api { .. } | AdminError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log(status: StatusCode, err: &AdminError) {
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
}

/// Error of a JSON endpoint, rendered as `{ "success": false, "error": ... }`.
#[derive(Debug)]
pub struct ApiError(pub AdminError);

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        log(status, &self.0);
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Error of an HTML page, rendered with the error template.
#[derive(Debug)]
pub struct PageError(pub AdminError);

impl From<AdminError> for PageError {
    fn from(err: AdminError) -> Self {
        PageError(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        log(status, &self.0);
        let page = render(&ErrorTemplate {
            status: status.as_u16(),
            message: self.0.to_string(),
        });
        match page {
            Ok(html) => (status, html).into_response(),
            Err(_) => (status, Html(self.0.to_string())).into_response(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
pub type PageResult<T> = std::result::Result<T, PageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::FirebaseEnv;

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(status_for(&AdminError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&AdminError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&AdminError::EnvironmentMismatch {
                prepared: FirebaseEnv::Dev,
                active: FirebaseEnv::Prod
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&AdminError::api(503, "down")), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&AdminError::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
