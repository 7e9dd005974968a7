use crate::approval::error::{DispatchError, LinkError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is authenticated but may not perform the operation
    #[error("Insufficient permissions to {action}")]
    InsufficientPermissions { action: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Too many failed attempts from this client
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Approve/reject resolution failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Link generation failed
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body of every API error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable error code
    #[schema(example = "signature")]
    pub error: &'static str,
    /// Human-readable description
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Dispatch(dispatch_err) => match dispatch_err {
                DispatchError::InvalidSignature => StatusCode::UNAUTHORIZED,
                DispatchError::UnauthorizedUser
                | DispatchError::InvalidCallbackUri { .. }
                | DispatchError::UnsupportedMethod(_)
                | DispatchError::Upstream { .. }
                | DispatchError::Transport { .. } => StatusCode::BAD_REQUEST,
            },
            Error::Link(link_err) => match link_err {
                LinkError::LengthExceeded { .. } => StatusCode::BAD_REQUEST,
                LinkError::InvalidBaseUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code reported in the `error` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::InsufficientPermissions { .. } => "forbidden",
            Error::BadRequest { .. } => "bad_request",
            Error::TooManyRequests { .. } => "too_many_requests",
            Error::Dispatch(dispatch_err) => match dispatch_err {
                DispatchError::InvalidSignature => "signature",
                other => other.label(),
            },
            Error::Link(LinkError::LengthExceeded { .. }) => "link_too_long",
            Error::Link(LinkError::InvalidBaseUrl(_)) | Error::Internal { .. } | Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action } => format!("Insufficient permissions to {action}"),
            Error::BadRequest { message } | Error::TooManyRequests { message } => message.clone(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::Dispatch(dispatch_err) => match dispatch_err {
                DispatchError::InvalidSignature => "The link signature is invalid".to_string(),
                DispatchError::UnauthorizedUser => "You are not allowed to act on this link".to_string(),
                DispatchError::InvalidCallbackUri { reason } => format!("The callback URI is invalid: {reason}"),
                DispatchError::UnsupportedMethod(method) => format!("Unsupported HTTP method: {method}"),
                DispatchError::Upstream { status, body } => match body {
                    Some(body) => format!("Callback returned HTTP {status}: {body}"),
                    None => format!("Callback returned HTTP {status}"),
                },
                DispatchError::Transport { kind, message } => format!("Callback request failed ({kind}): {message}"),
            },
            Error::Link(link_err) => match link_err {
                LinkError::LengthExceeded { .. } => link_err.to_string(),
                LinkError::InvalidBaseUrl(_) => "Internal server error".to_string(),
            },
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error_code(),
            message: self.user_message(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } | Error::Other(_) | Error::Link(LinkError::InvalidBaseUrl(_)) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } | Error::TooManyRequests { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Dispatch(DispatchError::InvalidSignature | DispatchError::UnauthorizedUser) => {
                tracing::info!("Link rejected: {}", self);
            }
            Error::Dispatch(_) | Error::Link(_) | Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
