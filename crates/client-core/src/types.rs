use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync loop phase reported for the currently selected conversation thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncPhase {
    /// No conversation is selected.
    Idle,
    /// Initial fetch for the selected conversation is in flight.
    Loading,
    /// Steady state, periodic refetch armed.
    ActivePolling,
    /// Hosting view is hidden; the poll timer is suspended.
    Paused,
}

/// A two-party conversation ("match") as held by the client.
///
/// Participant identities are stored post-resolution; `None` means the wire
/// value could not be resolved to a canonical identity string, which the
/// membership guard treats as non-membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Stable conversation ID.
    pub conversation_id: String,
    /// First participant, when resolvable.
    pub participant_a: Option<String>,
    /// Second participant, when resolvable.
    pub participant_b: Option<String>,
    /// Last-activity timestamp reported by the server, when present.
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// A single message within a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Stable message ID, unique within the held thread list.
    pub message_id: String,
    /// Owning conversation ID.
    pub conversation_id: String,
    /// Sender identity, when resolvable.
    pub sender_id: Option<String>,
    /// Message text.
    pub body: String,
    /// Creation timestamp; thread ordering key.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp, when present.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Severity/placement class for user-visible notices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoticeKind {
    /// Toast-level failure ("the system failed").
    Error,
    /// Inline input validation ("you made a mistake").
    Validation,
    /// Membership/authorization policy rejection.
    Policy,
}

/// Command channel input accepted by the client runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientCommand {
    /// Refetch the conversation list.
    RefreshConversations,
    /// Select a conversation and start its sync loop.
    SelectConversation {
        /// Target conversation ID.
        conversation_id: String,
    },
    /// Clear the selection and stop the sync loop.
    ClearSelection,
    /// Send a message to the selected conversation.
    SendMessage {
        /// Raw message body as typed; validated before any network call.
        body: String,
    },
    /// Report hosting view visibility; hidden suspends polling.
    SetVisibility {
        /// `true` when the hosting tab/window is visible.
        visible: bool,
    },
    /// Stop the runtime, cancelling timers and in-flight fetches.
    Shutdown,
}

/// Event channel output emitted by the client runtime and gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientEvent {
    /// Full conversation list replacement.
    ConversationListUpdated {
        /// Latest conversation records, most recent activity first.
        conversations: Vec<Conversation>,
    },
    /// Full thread replacement for the selected conversation.
    ThreadUpdated {
        /// Owning conversation ID.
        conversation_id: String,
        /// Canonical thread, ascending by creation time.
        messages: Vec<Message>,
    },
    /// Sync loop phase transition.
    SyncPhaseChanged {
        /// New phase.
        phase: SyncPhase,
    },
    /// A send settled successfully; the hosting UI should clear its input.
    MessageSent {
        /// Conversation the message was sent to.
        conversation_id: String,
    },
    /// User-visible notification.
    Notice {
        /// Placement/severity class.
        kind: NoticeKind,
        /// Display text.
        text: String,
    },
    /// The stored credential was rejected (401) and has been cleared.
    ///
    /// The hosting application reacts by navigating to its login entry
    /// point; the runtime does not recover from this on its own.
    Unauthenticated,
}
