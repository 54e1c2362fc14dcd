use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ClientCommand, ClientEvent, NoticeKind, SyncPhase};

/// Broadcast stream of runtime events (one receiver per frontend surface).
pub type EventStream = broadcast::Receiver<ClientEvent>;

/// Errors returned when driving the runtime over its command channel.
#[derive(Debug, Error)]
pub enum ClientChannelError {
    /// The runtime stopped and dropped its command receiver.
    #[error("client runtime is no longer accepting commands")]
    RuntimeGone,
}

/// The runtime's two-sided endpoint: commands in, events out.
///
/// Commands are bounded and awaited (a stalled runtime applies backpressure
/// to its frontends). Events fan out best-effort: a frontend that cannot
/// keep up lags on its own receiver without slowing the runtime or other
/// subscribers.
#[derive(Clone, Debug)]
pub struct ClientChannels {
    commands: mpsc::Sender<ClientCommand>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientChannels {
    /// Create the endpoint, returning the command receiver the runtime owns.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ClientCommand>) {
        let (commands, command_rx) = mpsc::channel(command_buffer.max(1));
        let (events, _) = broadcast::channel(event_buffer.max(1));

        (Self { commands, events }, command_rx)
    }

    /// Subscribe to runtime events from this point forward.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: ClientCommand) -> Result<(), ClientChannelError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientChannelError::RuntimeGone)
    }

    /// Emit an event to all subscribers. Having no subscribers is not an
    /// error; the runtime never blocks on its audience.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Surface a user-visible notice.
    pub fn notify(&self, kind: NoticeKind, text: impl Into<String>) {
        self.emit(ClientEvent::Notice {
            kind,
            text: text.into(),
        });
    }

    /// Report a sync phase transition.
    pub fn emit_phase(&self, phase: SyncPhase) {
        self.emit(ClientEvent::SyncPhaseChanged { phase });
    }
}
