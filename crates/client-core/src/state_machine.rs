use crate::types::SyncPhase;

/// Input applied to the thread sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInput {
    /// A conversation was selected (or the selection changed).
    Select,
    /// The in-flight fetch settled, successfully or not.
    FetchSettled,
    /// The hosting view became hidden.
    Hidden,
    /// The hosting view became visible again.
    Visible,
    /// The selection was cleared or the view unmounted.
    Deselect,
}

/// Side effect the runtime must carry out for a transition.
///
/// The poll timer and any in-flight fetch are owned resources: every
/// transition out of `ActivePolling` releases the timer, and every
/// selection change invalidates the outstanding fetch before a new one is
/// issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEffect {
    /// Issue a fetch for the selected conversation now.
    BeginFetch,
    /// Cancel and discard the outstanding fetch, if any.
    CancelFetch,
    /// Arm the periodic poll timer.
    ArmTimer,
    /// Clear the periodic poll timer.
    ClearTimer,
}

/// Per-thread sync lifecycle state machine.
///
/// `Idle → Loading → ActivePolling ⇄ Paused`, back to `Idle` on deselect.
/// Pure transition logic; the runtime owns the timers and requests the
/// effects describe.
#[derive(Debug, Clone)]
pub struct ThreadSyncMachine {
    phase: SyncPhase,
}

impl Default for ThreadSyncMachine {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
        }
    }
}

impl ThreadSyncMachine {
    /// Current sync phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Apply one input and return the effects to run, in order.
    ///
    /// Inputs that do not apply in the current phase (for example a
    /// visibility change while `Idle`) are no-ops.
    pub fn apply(&mut self, input: SyncInput) -> Vec<SyncEffect> {
        use SyncEffect::*;

        match (self.phase, input) {
            (_, SyncInput::Select) => {
                self.phase = SyncPhase::Loading;
                vec![CancelFetch, ClearTimer, BeginFetch]
            }
            (SyncPhase::Loading, SyncInput::FetchSettled) => {
                self.phase = SyncPhase::ActivePolling;
                vec![ArmTimer]
            }
            (SyncPhase::ActivePolling, SyncInput::Hidden) => {
                self.phase = SyncPhase::Paused;
                vec![ClearTimer]
            }
            (SyncPhase::Paused, SyncInput::Visible) => {
                self.phase = SyncPhase::ActivePolling;
                vec![BeginFetch, ArmTimer]
            }
            (_, SyncInput::Deselect) => {
                self.phase = SyncPhase::Idle;
                vec![CancelFetch, ClearTimer]
            }
            _ => Vec::new(),
        }
    }
}
