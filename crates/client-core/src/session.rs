use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::Value;

/// Identity fields tried on a cached user record, in priority order.
const CACHED_USER_ID_FIELDS: [&str; 2] = ["_id", "userId"];
/// Claim names tried in bearer-token payloads, in priority order.
const CLAIM_ID_FIELDS: [&str; 4] = ["_id", "userId", "sub", "id"];

/// Decode the claims object out of a bearer token without verification.
///
/// This is claims inspection only; the server remains the authority on the
/// token's validity. Any structural or encoding problem yields `None`.
pub fn decode_jwt_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Derive the current user's canonical identity string.
///
/// Priority: cached user record first, then token claims. Every failure
/// mode (missing inputs, unparseable record or token, no known field)
/// degrades silently to `None`; the caller's contract is "treat as
/// unauthenticated", not "crash".
pub fn derive_identity(cached_user: Option<&str>, token: Option<&str>) -> Option<String> {
    if let Some(raw) = cached_user
        && let Ok(record) = serde_json::from_str::<Value>(raw)
        && let Some(id) = first_identity_field(&record, &CACHED_USER_ID_FIELDS)
    {
        return Some(id);
    }

    let claims = decode_jwt_claims(token?)?;
    first_identity_field(&claims, &CLAIM_ID_FIELDS)
}

fn first_identity_field(record: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        record.get(field).and_then(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}
