//! HTTP error type and mappings from the downloader errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::dto::ApiResponse;
use crate::downloader::cookies::CookieError;
use crate::downloader::{DownloadError, StorageError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// Query or body failed validation
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, ApiResponse::failure(self.to_string())).into_response()
    }
}

impl From<StorageError> for HttpError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => HttpError::NotFound(msg),
            StorageError::InvalidName(msg) => HttpError::BadRequest(msg),
            other => HttpError::Internal(other.to_string()),
        }
    }
}

impl From<DownloadError> for HttpError {
    fn from(err: DownloadError) -> Self {
        let message = err.to_string();
        match err {
            DownloadError::InvalidUrl(_) => HttpError::BadRequest(message),
            DownloadError::ToolNotFound(_) => HttpError::ServiceUnavailable(message),
            DownloadError::NetworkTimeout(_)
            | DownloadError::RateLimited(_)
            | DownloadError::Network(_) => HttpError::ServiceUnavailable(message),
            _ => HttpError::Internal(message),
        }
    }
}

impl From<CookieError> for HttpError {
    fn from(err: CookieError) -> Self {
        match err {
            CookieError::UnsupportedBrowser(_) => HttpError::BadRequest(err.to_string()),
            CookieError::NotCached(_) => HttpError::NotFound(err.to_string()),
            CookieError::Export(inner) => HttpError::from(inner),
            other => HttpError::Internal(other.to_string()),
        }
    }
}
