//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inbox_triage_core::{LedgerError, PortError};
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A ledger operation failed.
    #[error("Ledger Error: {0}")]
    Ledger(#[from] LedgerError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The mail bridge could not be reached.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Port(PortError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::Ledger(e) => match e {
                LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
                LedgerError::UnexpectedItem(_) => StatusCode::BAD_REQUEST,
                LedgerError::Identity(_) => StatusCode::UNAUTHORIZED,
                LedgerError::Fetch(_) => StatusCode::BAD_GATEWAY,
                LedgerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed.");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
