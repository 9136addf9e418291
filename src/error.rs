//! Domain-specific error types for aiko-gateway

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the aiko-gateway HTTP service
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Workflow engine error ({status}): {message}")]
    Engine { status: u16, message: String },

    #[error("Workflow engine unreachable: {message}")]
    Transport { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error(
        "Timeout error: {operation} did not complete after {attempts} attempts, please retry"
    )]
    Timeout { operation: String, attempts: u32 },

    #[error("Cancelled: {operation} was interrupted")]
    Cancelled { operation: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Report error: {message}")]
    Report { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        GatewayError::NotFound {
            message: message.into(),
        }
    }

    /// HTTP status used when the error crosses the gateway boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } | GatewayError::InvalidParams { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Engine { .. } | GatewayError::Transport { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Config { .. }
            | GatewayError::Serialization { .. }
            | GatewayError::Io { .. }
            | GatewayError::Report { .. }
            | GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return GatewayError::Engine {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return GatewayError::Serialization {
                message: format!("Engine response could not be decoded: {}", err),
            };
        }
        GatewayError::Transport {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for GatewayError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        GatewayError::InvalidParams {
            message: format!("Malformed upload: {}", err.body_text()),
        }
    }
}

/// Convert GatewayError to a JSON HTTP response
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected: {}", self);
        }
        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
