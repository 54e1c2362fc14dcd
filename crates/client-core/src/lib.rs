//! Core client contract shared between the sync runtime and frontend consumers.
//!
//! This crate defines the command/event protocol, the tolerant response
//! normalizer, session-identity derivation, the conversation membership
//! guard, the per-thread sync state machine, and common error/channel
//! abstractions.

/// Async command/event channel primitives.
pub mod channel;
/// Stable client error types and HTTP classification helpers.
pub mod error;
/// Conversation membership checks.
pub mod guard;
/// Tolerant decoding of server response envelopes into canonical lists.
pub mod normalize;
/// Message body validation and send-response classification.
pub mod send;
/// Session identity derivation from cached records and bearer-token claims.
pub mod session;
/// Thread sync loop state machine.
pub mod state_machine;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;

pub use channel::{ClientChannelError, ClientChannels, EventStream};
pub use error::{ClientError, ClientErrorCategory, classify_http_status};
pub use guard::{check_membership, is_member, other_participant};
pub use normalize::{
    canonical_thread, dedupe_by_id, message_from_payload, normalize_conversations,
    normalize_messages, resolve_identity, sort_by_recent_activity,
};
pub use send::{MAX_MESSAGE_CHARS, SendDisposition, classify_send_response, validate_body};
pub use session::{decode_jwt_claims, derive_identity};
pub use state_machine::{SyncEffect, SyncInput, ThreadSyncMachine};
pub use types::{ClientCommand, ClientEvent, Conversation, Message, NoticeKind, SyncPhase};
