//! Command-driven sync runtime.
//!
//! Owns the conversation list, the selected thread, the poll timer, and the
//! single outstanding message fetch. Frontends drive it exclusively through
//! [`ClientCommand`]s and observe it through the broadcast event stream;
//! nothing here holds UI state.

use std::{sync::Arc, time::Duration};

use client_core::{
    ClientChannelError, ClientChannels, ClientCommand, ClientErrorCategory, ClientEvent,
    EventStream, Message, NoticeKind, SendDisposition, SyncEffect, SyncInput, SyncPhase,
    ThreadSyncMachine, canonical_thread, check_membership, classify_send_response, dedupe_by_id,
    normalize_conversations, normalize_messages, sort_by_recent_activity, validate_body,
};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{MatchApi, UnauthorizedSignal};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MESSAGE_WINDOW: u16 = 50;
const NOTE_BUFFER: usize = 32;

/// Tunables for the sync runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Steady-state refetch cadence for the selected thread.
    pub poll_interval: Duration,
    /// Number of most-recent messages requested per fetch.
    pub message_window: u16,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// Event channel capacity.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            message_window: DEFAULT_MESSAGE_WINDOW,
            command_buffer: 128,
            event_buffer: 512,
        }
    }
}

/// Handle used by the hosting application to drive the runtime.
#[derive(Clone, Debug)]
pub struct ClientRuntimeHandle {
    channels: ClientChannels,
}

impl ClientRuntimeHandle {
    /// Send one command to the runtime.
    pub async fn send(&self, command: ClientCommand) -> Result<(), ClientChannelError> {
        self.channels.send_command(command).await
    }

    /// Subscribe to runtime events.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn the runtime on the current tokio runtime and return its handle.
///
/// `identity` is the session identity resolved at startup; `None` means no
/// usable credential, in which case every fetch attempt reports
/// [`ClientEvent::Unauthenticated`] instead of touching the network.
pub fn spawn_runtime(
    api: Arc<dyn MatchApi>,
    unauthorized: UnauthorizedSignal,
    identity: Option<String>,
    config: RuntimeConfig,
) -> ClientRuntimeHandle {
    let (channels, command_rx) = ClientChannels::new(config.command_buffer, config.event_buffer);
    let runtime = ClientRuntime::new(
        channels.clone(),
        command_rx,
        api,
        unauthorized,
        identity,
        config,
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    ClientRuntimeHandle { channels }
}

/// Completion notice from a spawned fetch, send, or timer task.
#[derive(Debug)]
enum RuntimeNote {
    /// The poll timer fired.
    PollTick,
    /// The conversation-list fetch settled.
    ConversationsSettled {
        result: Result<Value, client_core::ClientError>,
    },
    /// A thread fetch settled.
    FetchSettled {
        generation: u64,
        conversation_id: String,
        result: Result<Value, client_core::ClientError>,
    },
    /// The in-flight send settled.
    SendSettled {
        conversation_id: String,
        result: Result<Value, client_core::ClientError>,
    },
}

struct RunningTimer {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct ClientRuntime {
    channels: ClientChannels,
    command_rx: mpsc::Receiver<ClientCommand>,
    note_tx: mpsc::Sender<RuntimeNote>,
    note_rx: mpsc::Receiver<RuntimeNote>,
    api: Arc<dyn MatchApi>,
    unauthorized: broadcast::Receiver<()>,
    unauthorized_closed: bool,
    identity: Option<String>,
    config: RuntimeConfig,
    sync: ThreadSyncMachine,
    conversations: Vec<client_core::Conversation>,
    selected: Option<String>,
    thread: Vec<Message>,
    visible: bool,
    send_in_flight: bool,
    /// Bumped on every selection change; settles carrying an older value
    /// belong to a dead selection and are discarded.
    fetch_generation: u64,
    fetch_cancel: Option<CancellationToken>,
    timer: Option<RunningTimer>,
}

impl ClientRuntime {
    fn new(
        channels: ClientChannels,
        command_rx: mpsc::Receiver<ClientCommand>,
        api: Arc<dyn MatchApi>,
        unauthorized: UnauthorizedSignal,
        identity: Option<String>,
        config: RuntimeConfig,
    ) -> Self {
        let (note_tx, note_rx) = mpsc::channel(NOTE_BUFFER);
        Self {
            channels,
            command_rx,
            note_tx,
            note_rx,
            api,
            unauthorized,
            unauthorized_closed: false,
            identity,
            config,
            sync: ThreadSyncMachine::default(),
            conversations: Vec::new(),
            selected: None,
            thread: Vec::new(),
            visible: true,
            send_in_flight: false,
            fetch_generation: 0,
            fetch_cancel: None,
            timer: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(ClientCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(note) = self.note_rx.recv() => self.handle_note(note),
                signal = self.unauthorized.recv(), if !self.unauthorized_closed => {
                    match signal {
                        Ok(()) => self.handle_unauthorized(),
                        Err(broadcast::error::RecvError::Lagged(_)) => self.handle_unauthorized(),
                        Err(broadcast::error::RecvError::Closed) => self.unauthorized_closed = true,
                    }
                }
            }
        }

        self.release_fetch();
        self.release_timer();
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::RefreshConversations => self.begin_conversations_fetch(),
            ClientCommand::SelectConversation { conversation_id } => {
                self.select_conversation(conversation_id)
            }
            ClientCommand::ClearSelection => self.clear_selection(),
            ClientCommand::SendMessage { body } => self.handle_send(body),
            ClientCommand::SetVisibility { visible } => self.set_visibility(visible),
            // Consumed by the run loop before dispatch.
            ClientCommand::Shutdown => {}
        }
    }

    fn handle_note(&mut self, note: RuntimeNote) {
        match note {
            RuntimeNote::PollTick => {
                if self.sync.phase() == SyncPhase::ActivePolling {
                    self.begin_thread_fetch();
                }
            }
            RuntimeNote::ConversationsSettled { result } => self.conversations_settled(result),
            RuntimeNote::FetchSettled {
                generation,
                conversation_id,
                result,
            } => self.thread_fetch_settled(generation, conversation_id, result),
            RuntimeNote::SendSettled {
                conversation_id,
                result,
            } => self.send_settled(conversation_id, result),
        }
    }

    fn handle_unauthorized(&mut self) {
        warn!("session credential rejected; stopping sync");
        self.identity = None;
        self.selected = None;
        self.thread = Vec::new();
        self.apply_sync_input(SyncInput::Deselect);
        self.channels.emit(ClientEvent::Unauthenticated);
    }

    fn select_conversation(&mut self, conversation_id: String) {
        if self.selected.as_deref() == Some(conversation_id.as_str()) {
            debug!(%conversation_id, "conversation already selected");
            return;
        }
        debug!(%conversation_id, "selecting conversation");
        self.selected = Some(conversation_id);
        self.thread = Vec::new();
        self.apply_sync_input(SyncInput::Select);
    }

    fn clear_selection(&mut self) {
        if self.selected.is_none() {
            return;
        }
        self.selected = None;
        self.thread = Vec::new();
        self.apply_sync_input(SyncInput::Deselect);
    }

    fn set_visibility(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        let input = if visible {
            SyncInput::Visible
        } else {
            SyncInput::Hidden
        };
        self.apply_sync_input(input);
    }

    /// Apply one state-machine input, report the phase change, then run the
    /// transition's effects.
    ///
    /// The phase is reported before the effects run: an effect may itself
    /// re-enter (a denied fetch drops the selection), and subscribers see
    /// each transition in the order it happened.
    fn apply_sync_input(&mut self, input: SyncInput) {
        let before = self.sync.phase();
        let effects = self.sync.apply(input);
        let after = self.sync.phase();
        if before != after {
            self.channels.emit_phase(after);
        }
        for effect in effects {
            match effect {
                SyncEffect::CancelFetch => {
                    self.release_fetch();
                    self.fetch_generation += 1;
                }
                SyncEffect::ClearTimer => self.release_timer(),
                SyncEffect::BeginFetch => self.begin_thread_fetch(),
                SyncEffect::ArmTimer => self.arm_timer(),
            }
        }
        // A fetch that settles while the view is hidden must not leave the
        // timer running.
        if self.sync.phase() == SyncPhase::ActivePolling && !self.visible {
            self.apply_sync_input(SyncInput::Hidden);
        }
    }

    fn release_fetch(&mut self) {
        if let Some(token) = self.fetch_cancel.take() {
            token.cancel();
        }
    }

    fn release_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop.cancel();
            timer.task.abort();
        }
    }

    fn arm_timer(&mut self) {
        // A denied fetch earlier in the same transition may have dropped
        // the selection; a timer without one would tick into nothing.
        if self.selected.is_none() {
            return;
        }
        self.release_timer();
        let stop = CancellationToken::new();
        let note_tx = self.note_tx.clone();
        let interval = self.config.poll_interval;
        let timer_stop = stop.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = timer_stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if note_tx.send(RuntimeNote::PollTick).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.timer = Some(RunningTimer { stop, task });
    }

    /// Resolve the selected conversation through the membership guard.
    ///
    /// Emits the appropriate event on failure and returns `None`; callers
    /// must make no transport call in that case.
    fn guarded_selection(&mut self) -> Option<String> {
        let conversation_id = self.selected.clone()?;
        if self.identity.is_none() {
            self.channels.emit(ClientEvent::Unauthenticated);
            return None;
        }
        let conversation = self
            .conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id);
        match check_membership(conversation, self.identity.as_deref()) {
            Ok(()) => Some(conversation_id),
            Err(err) => {
                warn!(%conversation_id, code = %err.code, "membership check failed");
                self.channels.notify(NoticeKind::Policy, err.message);
                None
            }
        }
    }

    fn begin_conversations_fetch(&mut self) {
        let api = Arc::clone(&self.api);
        let note_tx = self.note_tx.clone();
        tokio::spawn(async move {
            let result = api.list_conversations().await;
            let _ = note_tx
                .send(RuntimeNote::ConversationsSettled { result })
                .await;
        });
    }

    fn begin_thread_fetch(&mut self) {
        let Some(conversation_id) = self.guarded_selection() else {
            // A denied selection never recovers on its own; drop it so the
            // phase settles back to Idle instead of wedging in Loading.
            self.clear_selection();
            return;
        };

        // One outstanding fetch at a time; a tick that overlaps a slow fetch
        // supersedes it.
        self.release_fetch();
        let cancel = CancellationToken::new();
        self.fetch_cancel = Some(cancel.clone());

        let api = Arc::clone(&self.api);
        let note_tx = self.note_tx.clone();
        let generation = self.fetch_generation;
        let window = self.config.message_window;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = api.list_messages(&conversation_id, window) => {
                    let _ = note_tx
                        .send(RuntimeNote::FetchSettled {
                            generation,
                            conversation_id,
                            result,
                        })
                        .await;
                }
            }
        });
    }

    fn conversations_settled(&mut self, result: Result<Value, client_core::ClientError>) {
        let payload = match result {
            Ok(payload) => payload,
            Err(err) => {
                self.emit_failure_notice(err);
                return;
            }
        };

        let mut conversations =
            dedupe_by_id(normalize_conversations(&payload), |c| {
                c.conversation_id.as_str()
            });
        sort_by_recent_activity(&mut conversations);
        self.conversations = conversations;
        self.channels.emit(ClientEvent::ConversationListUpdated {
            conversations: self.conversations.clone(),
        });

        // Drop a selection the server no longer reports.
        let selection_gone = self.selected.as_deref().is_some_and(|selected| {
            !self
                .conversations
                .iter()
                .any(|c| c.conversation_id == selected)
        });
        if selection_gone {
            debug!("selected conversation disappeared from the list");
            self.clear_selection();
        }

        if self.selected.is_none()
            && let Some(first) = self.conversations.first()
        {
            let conversation_id = first.conversation_id.clone();
            self.select_conversation(conversation_id);
        }
    }

    fn thread_fetch_settled(
        &mut self,
        generation: u64,
        conversation_id: String,
        result: Result<Value, client_core::ClientError>,
    ) {
        if generation != self.fetch_generation
            || self.selected.as_deref() != Some(conversation_id.as_str())
        {
            debug!(%conversation_id, "discarding fetch for a dead selection");
            return;
        }

        match result {
            Ok(payload) => {
                let thread = canonical_thread(normalize_messages(&payload));
                if thread != self.thread {
                    self.thread = thread;
                    self.channels.emit(ClientEvent::ThreadUpdated {
                        conversation_id,
                        messages: self.thread.clone(),
                    });
                }
            }
            Err(err) => self.emit_failure_notice(err),
        }

        // Failures settle the fetch too; a transient error must not stall
        // the loop in Loading.
        self.apply_sync_input(SyncInput::FetchSettled);
    }

    fn handle_send(&mut self, body: String) {
        if self.send_in_flight {
            debug!("send already in flight; dropping");
            return;
        }

        let body = match validate_body(&body) {
            Ok(body) => body,
            Err(err) => {
                self.channels.notify(NoticeKind::Validation, err.message);
                return;
            }
        };

        let Some(conversation_id) = self.guarded_selection() else {
            return;
        };

        self.send_in_flight = true;
        let api = Arc::clone(&self.api);
        let note_tx = self.note_tx.clone();
        tokio::spawn(async move {
            let result = api.send_message(&conversation_id, &body).await;
            let _ = note_tx
                .send(RuntimeNote::SendSettled {
                    conversation_id,
                    result,
                })
                .await;
        });
    }

    fn send_settled(
        &mut self,
        conversation_id: String,
        result: Result<Value, client_core::ClientError>,
    ) {
        self.send_in_flight = false;

        let payload = match result {
            Ok(payload) => payload,
            Err(err) => {
                self.emit_failure_notice(err);
                return;
            }
        };

        if self.selected.as_deref() != Some(conversation_id.as_str()) {
            debug!(%conversation_id, "send settled for a dead selection");
            return;
        }

        match classify_send_response(&payload) {
            SendDisposition::Created(message) => {
                let mut thread = self.thread.clone();
                thread.push(message);
                self.thread = canonical_thread(thread);
                self.channels.emit(ClientEvent::ThreadUpdated {
                    conversation_id: conversation_id.clone(),
                    messages: self.thread.clone(),
                });
            }
            SendDisposition::Reconcile => {
                debug!(%conversation_id, "send response unusable; refetching");
                self.begin_thread_fetch();
            }
        }

        self.channels
            .emit(ClientEvent::MessageSent { conversation_id });
    }

    /// Surface a failed transport call. Auth failures are reported through
    /// the unauthorized signal instead, so a duplicate toast is skipped.
    fn emit_failure_notice(&mut self, err: client_core::ClientError) {
        if err.category == ClientErrorCategory::Auth {
            debug!(code = %err.code, "suppressing auth failure notice");
            return;
        }
        self.channels.notify(NoticeKind::Error, err.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client_core::{ClientError, Conversation};
    use serde_json::json;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::time::{advance, sleep};

    #[derive(Default)]
    struct MockApi {
        conversations: Value,
        messages: HashMap<String, Value>,
        message_delays: HashMap<String, Duration>,
        messages_error: Option<ClientError>,
        send_response: Value,
        send_delay: Option<Duration>,
        conversation_calls: AtomicUsize,
        message_calls: AtomicUsize,
        send_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MatchApi for MockApi {
        async fn list_conversations(&self) -> Result<Value, ClientError> {
            self.conversation_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.conversations.clone())
        }

        async fn list_messages(
            &self,
            conversation_id: &str,
            _limit: u16,
        ) -> Result<Value, ClientError> {
            self.message_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.message_delays.get(conversation_id) {
                sleep(*delay).await;
            }
            if let Some(err) = &self.messages_error {
                return Err(err.clone());
            }
            Ok(self
                .messages
                .get(conversation_id)
                .cloned()
                .unwrap_or_else(|| json!([])))
        }

        async fn send_message(&self, _conversation_id: &str, _body: &str) -> Result<Value, ClientError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.send_delay {
                sleep(delay).await;
            }
            Ok(self.send_response.clone())
        }
    }

    fn conversation_json(id: &str, a: &str, b: &str) -> Value {
        json!({ "_id": id, "userA": a, "userB": b, "lastMessageAt": "2026-08-01T00:00:00Z" })
    }

    fn message_json(id: &str, conversation: &str, sender: &str, body: &str, at: &str) -> Value {
        json!({
            "_id": id,
            "matchId": conversation,
            "senderId": sender,
            "body": body,
            "createdAt": at,
        })
    }

    fn spawn_with(api: MockApi) -> (ClientRuntimeHandle, Arc<MockApi>, broadcast::Sender<()>) {
        let api = Arc::new(api);
        let (unauthorized_tx, unauthorized_rx) = broadcast::channel(4);
        let handle = spawn_runtime(
            Arc::clone(&api) as Arc<dyn MatchApi>,
            unauthorized_rx,
            Some("u1".to_owned()),
            RuntimeConfig::default(),
        );
        (handle, api, unauthorized_tx)
    }

    async fn wait_for<F>(events: &mut EventStream, mut predicate: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    }

    async fn settle() {
        // Let spawned tasks run; the paused clock auto-advances.
        sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_and_auto_selects_most_recent_conversation() {
        let api = MockApi {
            conversations: json!({ "matches": [
                { "_id": "old", "userA": "u1", "userB": "u2", "lastMessageAt": "2026-01-01T00:00:00Z" },
                { "_id": "new", "userA": "u1", "userB": "u3", "lastMessageAt": "2026-06-01T00:00:00Z" },
            ]}),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");

        let event = wait_for(&mut events, |e| {
            matches!(e, ClientEvent::ConversationListUpdated { .. })
        })
        .await;
        let ClientEvent::ConversationListUpdated { conversations } = event else {
            unreachable!()
        };
        let ids: Vec<&str> = conversations
            .iter()
            .map(|c| c.conversation_id.as_str())
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        // Auto-selection fetches the most recent conversation.
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_the_configured_cadence() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), 2);

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_suspends_polling_and_visible_refetches_once() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        settle().await;
        let before = api.message_calls.load(Ordering::SeqCst);

        handle
            .send(ClientCommand::SetVisibility { visible: false })
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::Paused
                }
            )
        })
        .await;

        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before);

        handle
            .send(ClientCommand::SetVisibility { visible: true })
            .await
            .expect("send");
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before + 1);

        // Cadence resumes after the catch-up fetch.
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_conversations_discards_the_stale_fetch() {
        let mut messages = HashMap::new();
        messages.insert(
            "c1".to_owned(),
            json!([message_json("m1", "c1", "u2", "old thread", "2026-05-01T00:00:00Z")]),
        );
        messages.insert(
            "c2".to_owned(),
            json!([message_json("m2", "c2", "u3", "new thread", "2026-06-01T00:00:00Z")]),
        );
        let mut message_delays = HashMap::new();
        message_delays.insert("c1".to_owned(), Duration::from_millis(500));
        let api = MockApi {
            conversations: json!([
                conversation_json("c1", "u1", "u2"),
                conversation_json("c2", "u1", "u3"),
            ]),
            messages,
            message_delays,
            ..MockApi::default()
        };
        let (handle, _api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(e, ClientEvent::ConversationListUpdated { .. })
        })
        .await;

        // c1's fetch is slow; select c2 before it settles.
        handle
            .send(ClientCommand::SelectConversation {
                conversation_id: "c1".to_owned(),
            })
            .await
            .expect("send");
        settle().await;
        handle
            .send(ClientCommand::SelectConversation {
                conversation_id: "c2".to_owned(),
            })
            .await
            .expect("send");

        let event = wait_for(&mut events, |e| {
            matches!(e, ClientEvent::ThreadUpdated { .. })
        })
        .await;
        let ClientEvent::ThreadUpdated {
            conversation_id,
            messages,
        } = event
        else {
            unreachable!()
        };
        assert_eq!(conversation_id, "c2");
        assert_eq!(messages[0].body, "new thread");

        // Give c1's delayed response time to surface if it was going to.
        advance(Duration::from_millis(600)).await;
        settle().await;
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::ThreadUpdated {
                conversation_id, ..
            } = event
            {
                assert_eq!(conversation_id, "c2", "stale thread crossed selections");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_member_selection_is_denied_without_a_transport_call() {
        let api = MockApi {
            conversations: json!([
                conversation_json("c1", "u1", "u2"),
                conversation_json("foreign", "u5", "u6"),
            ]),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(e, ClientEvent::ConversationListUpdated { .. })
        })
        .await;
        settle().await;
        let before = api.message_calls.load(Ordering::SeqCst);

        handle
            .send(ClientCommand::SelectConversation {
                conversation_id: "foreign".to_owned(),
            })
            .await
            .expect("send");
        let event = wait_for(&mut events, |e| matches!(e, ClientEvent::Notice { .. })).await;
        let ClientEvent::Notice { kind, .. } = event else {
            unreachable!()
        };
        assert_eq!(kind, NoticeKind::Policy);
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_selection_settles_back_to_idle_and_recovers() {
        let api = MockApi {
            conversations: json!([
                conversation_json("c1", "u1", "u2"),
                conversation_json("foreign", "u5", "u6"),
            ]),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        settle().await;
        let before = api.message_calls.load(Ordering::SeqCst);

        handle
            .send(ClientCommand::SelectConversation {
                conversation_id: "foreign".to_owned(),
            })
            .await
            .expect("send");

        // The denial drops the selection rather than leaving the loop
        // stuck in Loading with no fetch ever settling.
        wait_for(&mut events, |e| matches!(e, ClientEvent::Notice { .. })).await;
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::Idle
                }
            )
        })
        .await;

        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before);

        // A valid selection afterwards polls normally.
        handle
            .send(ClientCommand::SelectConversation {
                conversation_id: "c1".to_owned(),
            })
            .await
            .expect("send");
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_appends_the_created_message_optimistically() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            send_response: json!({
                "message": message_json("m9", "c1", "u1", "hello there", "2026-08-01T12:00:00Z"),
            }),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        let fetches_before = api.message_calls.load(Ordering::SeqCst);

        handle
            .send(ClientCommand::SendMessage {
                body: "hello there".to_owned(),
            })
            .await
            .expect("send");

        let event = wait_for(&mut events, |e| {
            matches!(e, ClientEvent::ThreadUpdated { .. })
        })
        .await;
        let ClientEvent::ThreadUpdated { messages, .. } = event else {
            unreachable!()
        };
        assert!(messages.iter().any(|m| m.message_id == "m9"));

        wait_for(&mut events, |e| matches!(e, ClientEvent::MessageSent { .. })).await;
        assert_eq!(api.send_calls.load(Ordering::SeqCst), 1);
        // The usable response body makes the read-after-write refetch
        // unnecessary.
        assert_eq!(api.message_calls.load(Ordering::SeqCst), fetches_before);
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_send_response_falls_back_to_a_refetch() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            send_response: json!({ "ok": true }),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        settle().await;
        let fetches_before = api.message_calls.load(Ordering::SeqCst);

        handle
            .send(ClientCommand::SendMessage {
                body: "hi".to_owned(),
            })
            .await
            .expect("send");
        wait_for(&mut events, |e| matches!(e, ClientEvent::MessageSent { .. })).await;
        settle().await;

        assert_eq!(api.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.message_calls.load(Ordering::SeqCst), fetches_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_body_is_rejected_before_any_network_call() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;

        handle
            .send(ClientCommand::SendMessage {
                body: "x".repeat(1001),
            })
            .await
            .expect("send");
        let event = wait_for(&mut events, |e| matches!(e, ClientEvent::Notice { .. })).await;
        let ClientEvent::Notice { kind, .. } = event else {
            unreachable!()
        };
        assert_eq!(kind, NoticeKind::Validation);
        assert_eq!(api.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_sends_collapse_to_one_request() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            send_response: json!({
                "message": message_json("m9", "c1", "u1", "first", "2026-08-01T12:00:00Z"),
            }),
            send_delay: Some(Duration::from_millis(200)),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;

        handle
            .send(ClientCommand::SendMessage {
                body: "first".to_owned(),
            })
            .await
            .expect("send");
        handle
            .send(ClientCommand::SendMessage {
                body: "second".to_owned(),
            })
            .await
            .expect("send");

        wait_for(&mut events, |e| matches!(e, ClientEvent::MessageSent { .. })).await;
        settle().await;
        assert_eq!(api.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_surfaces_a_notice_and_polling_continues() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            messages_error: Some(ClientError::new(
                ClientErrorCategory::Network,
                "transport_error",
                "connection reset",
            )),
            ..MockApi::default()
        };
        let (handle, api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        let event = wait_for(&mut events, |e| matches!(e, ClientEvent::Notice { .. })).await;
        let ClientEvent::Notice { kind, text } = event else {
            unreachable!()
        };
        assert_eq!(kind, NoticeKind::Error);
        assert_eq!(text, "connection reset");

        // The failure settles the fetch and the loop keeps polling.
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        settle().await;
        let before = api.message_calls.load(Ordering::SeqCst);
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_signal_stops_sync_and_reports_unauthenticated() {
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            ..MockApi::default()
        };
        let (handle, api, unauthorized_tx) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::ActivePolling
                }
            )
        })
        .await;
        settle().await;
        let before = api.message_calls.load(Ordering::SeqCst);

        unauthorized_tx.send(()).expect("signal");
        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::SyncPhaseChanged {
                    phase: SyncPhase::Idle
                }
            )
        })
        .await;
        wait_for(&mut events, |e| matches!(e, ClientEvent::Unauthenticated)).await;

        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(api.message_calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_polls_with_identical_payload_emit_one_thread_update() {
        let mut messages = HashMap::new();
        messages.insert(
            "c1".to_owned(),
            json!([message_json("m1", "c1", "u2", "hey", "2026-05-01T00:00:00Z")]),
        );
        let api = MockApi {
            conversations: json!([conversation_json("c1", "u1", "u2")]),
            messages,
            ..MockApi::default()
        };
        let (handle, _api, _unauth) = spawn_with(api);
        let mut events = handle.subscribe();

        handle
            .send(ClientCommand::RefreshConversations)
            .await
            .expect("send");
        wait_for(&mut events, |e| {
            matches!(e, ClientEvent::ThreadUpdated { .. })
        })
        .await;

        advance(Duration::from_secs(9)).await;
        settle().await;
        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, ClientEvent::ThreadUpdated { .. }),
                "unchanged thread re-emitted"
            );
        }
    }

    #[test]
    fn guard_failure_paths_pick_distinct_outcomes() {
        let conversation = Conversation {
            conversation_id: "c1".to_owned(),
            participant_a: Some("u1".to_owned()),
            participant_b: Some("u2".to_owned()),
            last_activity_at: None,
        };
        assert!(check_membership(Some(&conversation), Some("u1")).is_ok());
        assert!(check_membership(Some(&conversation), Some("u9")).is_err());
        assert!(check_membership(None, Some("u1")).is_err());
        assert!(check_membership(Some(&conversation), None).is_err());
    }
}
