//! HTTP error responses.
//!
//! Every failure leaves the gateway as `{"error": {"message": "..."}}` with
//! a status derived from the error's bounded context.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gemrelay_core::{AttachmentError, Error, RemoteError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
}

/// An error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Input(_) | Error::Attachment(AttachmentError::Rejected(_)) => {
                StatusCode::BAD_REQUEST
            }
            Error::Attachment(AttachmentError::Transport(_)) => StatusCode::BAD_GATEWAY,
            Error::Remote(RemoteError::NotInitialized(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Remote(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Client-facing messages carry no context prefix.
        let message = match err {
            Error::Input(message) => message,
            Error::Attachment(e) => e.to_string(),
            other => other.to_string(),
        };
        Self::new(status, message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
