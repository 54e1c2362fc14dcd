use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{Conversation, Message};

/// Wrapper keys tried, in priority order, for conversation list payloads.
const CONVERSATION_LIST_KEYS: [&str; 4] = ["matches", "value", "data", "result"];
/// Wrapper keys tried, in priority order, for message list payloads.
const MESSAGE_LIST_KEYS: [&str; 4] = ["messages", "lastMessages", "data", "result"];

/// Primary-key fields tried on entity records.
const RECORD_ID_FIELDS: [&str; 2] = ["_id", "id"];
/// Identity fields tried inside embedded participant/sender objects.
const EMBEDDED_IDENTITY_FIELDS: [&str; 3] = ["_id", "id", "userId"];

/// Resolve a participant/sender field into a canonical identity string.
///
/// The wire value may be a bare identity or an object embedding one; any
/// other shape resolves to `None` and is never trusted raw.
pub fn resolve_identity(value: &Value) -> Option<String> {
    if let Some(id) = stringified(value) {
        return Some(id);
    }
    EMBEDDED_IDENTITY_FIELDS
        .iter()
        .find_map(|field| value.get(field).and_then(stringified))
}

/// Decode a conversation list from any accepted payload shape.
///
/// Accepts a bare array or an object wrapping the array under the first
/// matching known key; anything else yields an empty list, never an error.
pub fn normalize_conversations(payload: &Value) -> Vec<Conversation> {
    list_items(payload, &CONVERSATION_LIST_KEYS)
        .iter()
        .filter_map(conversation_from_value)
        .collect()
}

/// Decode a message list from any accepted payload shape.
pub fn normalize_messages(payload: &Value) -> Vec<Message> {
    list_items(payload, &MESSAGE_LIST_KEYS)
        .iter()
        .filter_map(message_from_payload)
        .collect()
}

/// Stable de-duplication keeping the first occurrence per ID.
pub fn dedupe_by_id<T, F>(items: Vec<T>, id_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen: HashSet<String> = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(id_of(item).to_owned()))
        .collect()
}

/// Canonicalize a polled message window: de-duplicate by message ID, then
/// sort ascending by creation time.
///
/// Every mutation of a held thread goes through this path, never a raw
/// append, so overlapping or re-ordered server windows cannot break the
/// thread invariants.
pub fn canonical_thread(messages: Vec<Message>) -> Vec<Message> {
    let mut thread = dedupe_by_id(messages, |message| &message.message_id);
    thread.sort_by_key(|message| message.created_at);
    thread
}

/// Order conversations most-recent activity first; unknown activity sorts last.
pub fn sort_by_recent_activity(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
}

fn list_items<'a>(payload: &'a Value, wrapper_keys: &[&str]) -> &'a [Value] {
    if let Some(items) = payload.as_array() {
        return items;
    }
    if payload.is_object() {
        for key in wrapper_keys {
            if let Some(items) = payload.get(key).and_then(Value::as_array) {
                return items;
            }
        }
    }
    &[]
}

fn conversation_from_value(value: &Value) -> Option<Conversation> {
    let conversation_id = record_id(value)?;
    Some(Conversation {
        conversation_id,
        participant_a: value.get("userA").and_then(resolve_identity),
        participant_b: value.get("userB").and_then(resolve_identity),
        last_activity_at: value
            .get("lastMessageAt")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
    })
}

/// Decode a single message record, if the payload carries one.
///
/// Used by list normalization and by send-response classification, so a
/// created-message envelope decodes exactly like a polled one.
pub fn message_from_payload(value: &Value) -> Option<Message> {
    let message_id = record_id(value)?;
    let conversation_id = value
        .get("matchId")
        .or_else(|| value.get("conversationId"))
        .and_then(stringified)
        .unwrap_or_default();
    Some(Message {
        message_id,
        conversation_id,
        sender_id: value.get("senderId").and_then(resolve_identity),
        body: value
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        created_at: value
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: value
            .get("updatedAt")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
    })
}

fn record_id(value: &Value) -> Option<String> {
    RECORD_ID_FIELDS
        .iter()
        .find_map(|field| value.get(field).and_then(stringified))
}

fn stringified(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
