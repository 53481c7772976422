use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Every failure the HTTP surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoFile,
    ValidationFailed,
    PayloadTooLarge,
    UnsupportedType,
    RateLimited,
    NotFound,
    UploadFailed,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NoFile | ErrorKind::ValidationFailed | ErrorKind::UnsupportedType => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UploadFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code included in error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NoFile => "NO_FILE",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::UnsupportedType => "UNSUPPORTED_TYPE",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::UploadFailed => "UPLOAD_FAILED",
        }
    }
}

/// Error returned by handlers. The message is what the client sees.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn no_file() -> Self {
        Self::new(ErrorKind::NoFile, "No file uploaded")
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, msg)
    }

    pub fn payload_too_large(limit: u64) -> Self {
        Self::new(
            ErrorKind::PayloadTooLarge,
            format!("File exceeds the maximum size of {} bytes", limit),
        )
    }

    pub fn unsupported_type(mime: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedType,
            format!("File type `{}` is not allowed", mime),
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(
            ErrorKind::RateLimited,
            "Too many uploads from this address. Please try again later.",
        )
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "File not found")
    }

    /// Generic 500. Callers log the cause; the client never sees it.
    pub fn upload_failed() -> Self {
        Self::new(ErrorKind::UploadFailed, "Upload failed")
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "code": self.kind.code(),
        }));

        (self.status(), body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidId(_) => AppError::not_found(),
            StorageError::UnsupportedType(mime) => AppError::unsupported_type(&mime),
            StorageError::PayloadTooLarge { limit } => AppError::payload_too_large(limit),
            StorageError::MalformedUpload(reason) => AppError::validation(reason),
            other => {
                tracing::error!(error = %other, "storage operation failed");
                AppError::upload_failed()
            }
        }
    }
}
