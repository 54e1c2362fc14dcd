use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientErrorCategory {
    /// Credential rejected or missing; escalated globally, never retried.
    Auth,
    /// Transient network or transport failure; recovered locally.
    Network,
    /// Request rejected by the server for non-auth reasons.
    Request,
    /// Response body could not be decoded.
    Decode,
    /// Input rejected before any network call.
    Validation,
    /// Client-side membership policy rejection.
    Policy,
    /// Internal client bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ClientError {
    /// High-level error category.
    pub category: ClientErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ClientError {
    /// Construct a new client error.
    pub fn new(
        category: ClientErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a validation error surfaced inline at the input.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ClientErrorCategory::Validation, code, message)
    }

    /// Build a membership policy rejection.
    pub fn policy(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ClientErrorCategory::Policy, code, message)
    }
}

/// Map HTTP status codes to client error categories.
pub fn classify_http_status(status: u16) -> ClientErrorCategory {
    match status {
        401 | 403 => ClientErrorCategory::Auth,
        408 | 429 | 500..=599 => ClientErrorCategory::Network,
        400..=499 => ClientErrorCategory::Request,
        _ => ClientErrorCategory::Internal,
    }
}
