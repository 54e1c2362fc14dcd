//! Conversation membership checks.
//!
//! These are client-side UX guards only: they keep the UI from issuing
//! requests the server would reject, but they are a courtesy check, not a
//! substitute for server-side authorization.

use crate::{
    error::ClientError,
    types::Conversation,
};

/// Whether `identity` canonically equals either resolved participant.
///
/// An unresolved participant side never matches.
pub fn is_member(conversation: &Conversation, identity: &str) -> bool {
    conversation.participant_a.as_deref() == Some(identity)
        || conversation.participant_b.as_deref() == Some(identity)
}

/// The identity on the opposite side of `conversation` from `identity`.
pub fn other_participant<'a>(
    conversation: &'a Conversation,
    identity: &str,
) -> Option<&'a str> {
    if conversation.participant_a.as_deref() == Some(identity) {
        conversation.participant_b.as_deref()
    } else if conversation.participant_b.as_deref() == Some(identity) {
        conversation.participant_a.as_deref()
    } else {
        None
    }
}

/// Gate a read or write against the selected conversation.
///
/// Evaluated before every poll tick and before every send; on failure the
/// single operation is aborted and no request reaches the transport.
pub fn check_membership(
    conversation: Option<&Conversation>,
    identity: Option<&str>,
) -> Result<(), ClientError> {
    let identity = identity.ok_or_else(|| {
        ClientError::policy("no_session_identity", "no signed-in user identity")
    })?;
    let conversation = conversation.ok_or_else(|| {
        ClientError::policy("conversation_unknown", "conversation is not in the held list")
    })?;

    if is_member(conversation, identity) {
        Ok(())
    } else {
        Err(ClientError::policy(
            "not_conversation_member",
            "you are not authorized for this conversation",
        ))
    }
}
