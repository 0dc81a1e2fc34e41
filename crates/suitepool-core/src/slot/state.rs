use std::fmt;

/// Lifecycle of a server slot.
///
/// ```text
/// Idle ──run──▶ Running ──runner exit──▶ Idle
///   │              │
///   │          disconnect
///   │              ▼
///   │          Draining ──runner exit──┐
///   │                                  ▼
///   └──disconnect / disconnect now──▶ ShuttingDown ──▶ Terminated
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotState {
    /// Server is up, no runner.
    #[default]
    Idle,
    /// A runner executes a suite.
    Running,
    /// A runner executes a suite and no more work will be accepted.
    Draining,
    /// Workers are being stopped.
    ShuttingDown,
    Terminated,
}

impl SlotState {
    pub fn accepts_work(self) -> bool {
        matches!(self, SlotState::Idle)
    }

    pub fn has_runner(self) -> bool {
        matches!(self, SlotState::Running | SlotState::Draining)
    }

    pub fn is_stopping(self) -> bool {
        matches!(self, SlotState::ShuttingDown | SlotState::Terminated)
    }

    /// `run(suite)`; `None` when the slot cannot take a suite now.
    pub fn on_run(self) -> Option<SlotState> {
        match self {
            SlotState::Idle => Some(SlotState::Running),
            _ => None,
        }
    }

    /// Runner exited. `Idle` means the slot asks for more work.
    pub fn on_runner_exit(self) -> SlotState {
        match self {
            SlotState::Running => SlotState::Idle,
            SlotState::Draining => SlotState::ShuttingDown,
            other => other,
        }
    }

    /// Graceful disconnect: finish the current suite first.
    pub fn on_disconnect(self) -> SlotState {
        match self {
            SlotState::Idle => SlotState::ShuttingDown,
            SlotState::Running => SlotState::Draining,
            other => other,
        }
    }

    pub fn on_disconnect_now(self) -> SlotState {
        match self {
            SlotState::Terminated => SlotState::Terminated,
            _ => SlotState::ShuttingDown,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Idle => "idle",
            SlotState::Running => "running",
            SlotState::Draining => "draining",
            SlotState::ShuttingDown => "shutting-down",
            SlotState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}
