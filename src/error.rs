use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Webhook delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error(
        "No webhook destination configured: set wecom.webhook, WECHAT_ROBOT_WEBHOOK or WECHAT_ROBOT_KEY"
    )]
    NotConfigured,

    #[error("Webhook request failed: {0}")]
    Transport(String),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Failed to encode webhook payload: {0}")]
    Encode(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg,
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::Notify(NotifyError::NotConfigured) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "WEBHOOK_NOT_CONFIGURED",
                NotifyError::NotConfigured.to_string(),
                None,
            ),
            AppError::Notify(NotifyError::Status(code)) => (
                StatusCode::BAD_GATEWAY,
                "WEBHOOK_REJECTED",
                format!("Webhook returned status {}", code),
                Some(serde_json::json!({ "status": code })),
            ),
            AppError::Notify(err) => (
                StatusCode::BAD_GATEWAY,
                "WEBHOOK_FAILED",
                err.to_string(),
                None,
            ),
            AppError::ExternalError(msg) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_ERROR",
                msg,
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let detail = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");
        AppError::InvalidInput(format!("Validation failed: {}", detail))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
