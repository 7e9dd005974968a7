use std::fmt;

use thiserror::Error;

/// Errors raised while building a [`Signer`](super::Signer).
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing secret must not be empty")]
    EmptySecret,

    #[error("derived signing key has an invalid length")]
    InvalidKeyLength,
}

/// Errors raised by link generation. None of them involve network activity.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The encoded link does not fit through channels that truncate long URLs
    #[error("generated link is {length} characters long, the maximum is {max}")]
    LengthExceeded { length: usize, max: usize },

    /// The configured public URL cannot be joined with the link path
    #[error("cannot build link from base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

/// Why an outbound callback request never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Cancelled,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        };
        f.write_str(kind)
    }
}

/// Failures of approve/reject resolution, in the order they can occur.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The supplied signature does not match the link contents
    #[error("invalid signature")]
    InvalidSignature,

    /// The link is bound to a user other than the one acting on it
    #[error("unauthorized user")]
    UnauthorizedUser,

    /// The selected callback is not an absolute http(s) URI
    #[error("invalid callback URI: {reason}")]
    InvalidCallbackUri { reason: String },

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// The callback answered with a 4xx or 5xx status
    #[error("callback returned HTTP {status}")]
    Upstream { status: u16, body: Option<String> },

    /// The callback could not be reached
    #[error("callback request failed ({kind}): {message}")]
    Transport { kind: TransportErrorKind, message: String },
}

impl DispatchError {
    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::InvalidSignature => "invalid_signature",
            DispatchError::UnauthorizedUser => "unauthorized_user",
            DispatchError::InvalidCallbackUri { .. } => "invalid_callback_uri",
            DispatchError::UnsupportedMethod(_) => "unsupported_method",
            DispatchError::Upstream { .. } => "upstream",
            DispatchError::Transport { .. } => "transport",
        }
    }
}
