use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::scope::Scope;
use crate::websocket::close_code;

/// Admission refusals. Fatal to the attempt; the connection never enters
/// the registry. Each variant maps to a distinct, stable reject code.
#[derive(Error, Debug, Clone)]
pub enum AdmissionError {
    #[error("missing authentication token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token lacks the required read capability")]
    InsufficientPermissions,

    #[error("unknown scope: {0}")]
    InvalidScope(String),

    #[error("scope {scope} at capacity ({current}/{max})")]
    CapacityExceeded {
        scope: Scope,
        current: usize,
        max: usize,
    },
}

impl AdmissionError {
    /// Stable reject code, recorded in audit events and returned to the
    /// client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken | Self::InvalidToken(_) | Self::InsufficientPermissions => {
                "UNAUTHORIZED"
            }
            Self::InvalidScope(_) => "INVALID_SCOPE",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken(_) | Self::InsufficientPermissions => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidScope(_) => StatusCode::FORBIDDEN,
            Self::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Registry consistency failures on insert. Internal errors, not protocol
/// errors: both indicate the caller raced or double-registered, never
/// client misbehavior.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("transport handle {0} is already registered")]
    HandleInUse(u64),

    #[error("scope {scope} at capacity ({current}/{max})")]
    CapacityExceeded {
        scope: Scope,
        current: usize,
        max: usize,
    },
}

impl RegistryError {
    /// Close code sent when registration fails after the socket upgrade.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::HandleInUse(_) => close_code::INTERNAL_DESYNC,
            Self::CapacityExceeded { .. } => close_code::CAPACITY_EXCEEDED,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Admission refused: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    client_msg,
                    log_msg,
                )
            }
            AppError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Admission(e) => (e.status(), e.code(), e.to_string(), e.to_string()),
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    client_msg,
                    log_msg,
                )
            }
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
