use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(authenticator::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(authenticator::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(authenticator::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(authenticator::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("JOSE error: {0}")]
    #[diagnostic(code(authenticator::jose))]
    Jose(String),

    #[error("TOTP error: {0}")]
    #[diagnostic(code(authenticator::totp))]
    Totp(#[from] crate::totp::TotpError),

    #[error("QR encoding error: {0}")]
    #[diagnostic(code(authenticator::qr))]
    Qr(#[from] qrcode::types::QrError),

    #[error("Image encoding error: {0}")]
    #[diagnostic(code(authenticator::image))]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    #[diagnostic(code(authenticator::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(authenticator::unauthorized))]
    Unauthorized(String),

    #[error("{0}")]
    #[diagnostic(code(authenticator::forbidden))]
    Forbidden(String),

    #[error("{0}")]
    #[diagnostic(code(authenticator::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(authenticator::conflict))]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(code(authenticator::other))]
    Other(String),
}

impl From<josekit::JoseError> for AuthError {
    fn from(value: josekit::JoseError) -> Self {
        AuthError::Jose(value.to_string())
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a client. Infrastructure failures are masked.
    pub fn public_message(&self) -> String {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Body shape shared by every JSON reply of the service.
#[derive(Debug, Clone, Serialize)]
pub struct ApiMessage {
    pub status: u16,
    pub message: String,
}

impl ApiMessage {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ApiMessage::new(status, self.public_message()))).into_response()
    }
}
