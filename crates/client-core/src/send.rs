use serde_json::Value;

use crate::{
    error::ClientError,
    normalize,
    types::Message,
};

/// Maximum accepted message length, in characters, after trimming.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// How the runtime should fold a settled send back into the held thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendDisposition {
    /// The response carried a fully-formed message record; append it
    /// through the shared dedupe/sort path.
    Created(Message),
    /// The response was ambiguous; refetch the thread instead of trusting
    /// a partial payload.
    Reconcile,
}

/// Validate a raw message body before any network call.
///
/// Returns the trimmed body on success. Failures are `Validation` errors
/// surfaced inline at the input, not as toast-level notices.
pub fn validate_body(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClientError::validation(
            "empty_message",
            "message is empty",
        ));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ClientError::validation(
            "message_too_long",
            format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

/// Classify a create-message response payload.
pub fn classify_send_response(payload: &Value) -> SendDisposition {
    payload
        .get("message")
        .and_then(normalize::message_from_payload)
        .map_or(SendDisposition::Reconcile, SendDisposition::Created)
}
