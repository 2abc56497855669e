//! Error types for the SmartWaste API client.
//!
//! # Design
//! `ApiError` is a closed set. Every remote-induced outcome, including
//! transport failures and undecodable bodies, lands in one of its variants
//! so callers can branch on `kind()` without string matching. `Network` is
//! kept apart from the HTTP-status variants because callers apply
//! different retry policies to "no response" and "bad response".

use thiserror::Error;

pub const MSG_NETWORK: &str = "Network error. Please check your connection.";
pub const MSG_UNAUTHORIZED: &str = "Session expired. Please login again.";
pub const MSG_FORBIDDEN: &str = "You do not have permission to perform this action.";
pub const MSG_NOT_FOUND: &str = "The requested resource was not found.";
pub const MSG_SERVER: &str = "Server error. Please try again later.";
pub const MSG_VALIDATION: &str = "Please check your input and try again.";
pub const MSG_UNKNOWN: &str = "An unexpected error occurred.";
pub const MSG_CANCELLED: &str = "Request was cancelled.";

/// Errors returned by `ApiClient` operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server returned 401. The session has already been cleared.
    #[error("{message}")]
    Unauthorized { message: String },

    /// The server returned 403.
    #[error("{message}")]
    Forbidden { message: String },

    /// The server returned 404.
    #[error("{message}")]
    NotFound { message: String },

    /// The server rejected the input (400 or 422), or a login was refused.
    #[error("{message}")]
    Validation { message: String },

    /// The server returned a 5xx status.
    #[error("{message} (status {status})")]
    ServerError { status: u16, message: String },

    /// No response was obtained: timeout, DNS, refused connection.
    #[error("{message}")]
    Network { message: String },

    /// The caller cancelled the request before a response arrived.
    #[error("{message}")]
    Cancelled { message: String },

    /// Any other failure. `status` is set when a response was received.
    #[error("{message}")]
    Unknown { status: Option<u16>, message: String },
}

/// Fieldless discriminant of `ApiError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    ServerError,
    Network,
    Cancelled,
    Unknown,
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            ApiError::Unauthorized { .. } => ApiErrorKind::Unauthorized,
            ApiError::Forbidden { .. } => ApiErrorKind::Forbidden,
            ApiError::NotFound { .. } => ApiErrorKind::NotFound,
            ApiError::Validation { .. } => ApiErrorKind::Validation,
            ApiError::ServerError { .. } => ApiErrorKind::ServerError,
            ApiError::Network { .. } => ApiErrorKind::Network,
            ApiError::Cancelled { .. } => ApiErrorKind::Cancelled,
            ApiError::Unknown { .. } => ApiErrorKind::Unknown,
        }
    }

    /// HTTP status of the response that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::ServerError { status, .. } => Some(*status),
            ApiError::Unknown { status, .. } => *status,
            ApiError::Validation { .. } | ApiError::Network { .. } | ApiError::Cancelled { .. } => {
                None
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::Forbidden { message }
            | ApiError::NotFound { message }
            | ApiError::Validation { message }
            | ApiError::ServerError { message, .. }
            | ApiError::Network { message }
            | ApiError::Cancelled { message }
            | ApiError::Unknown { message, .. } => message,
        }
    }

    /// True when no response reached the client.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: non_empty(message.into(), MSG_NETWORK),
        }
    }

    pub(crate) fn cancelled() -> Self {
        ApiError::Cancelled {
            message: MSG_CANCELLED.to_string(),
        }
    }

    pub(crate) fn unknown(status: Option<u16>, message: impl Into<String>) -> Self {
        ApiError::Unknown {
            status,
            message: non_empty(message.into(), MSG_UNKNOWN),
        }
    }

    /// Classify a non-2xx status, substituting the status-keyed default when
    /// `message` is absent or blank.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let pick = |fallback: &str| match &message {
            Some(m) if !m.trim().is_empty() => m.clone(),
            _ => fallback.to_string(),
        };
        match status {
            400 | 422 => ApiError::Validation {
                message: pick(MSG_VALIDATION),
            },
            401 => ApiError::Unauthorized {
                message: pick(MSG_UNAUTHORIZED),
            },
            403 => ApiError::Forbidden {
                message: pick(MSG_FORBIDDEN),
            },
            404 => ApiError::NotFound {
                message: pick(MSG_NOT_FOUND),
            },
            500..=599 => ApiError::ServerError {
                status,
                message: pick(MSG_SERVER),
            },
            _ => ApiError::Unknown {
                status: Some(status),
                message: pick(MSG_UNKNOWN),
            },
        }
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
