//! Seam between the orchestration logic and real processes.
use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use suitepool_model::{Message, WorkerEnv, WorkerId, WorkerRole};

use crate::error::CoreError;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit status, `None` when the process was killed by a signal or lost.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn signaled() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Something observed on a worker's upward channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(Message),
    /// Always the last event of a worker.
    Exited(WorkerExit),
}

/// Parent-side handle of one spawned worker.
///
/// Messages are delivered in the order the worker wrote them, followed by
/// exactly one [`WorkerEvent::Exited`].
pub struct WorkerProcess {
    id: WorkerId,
    role: WorkerRole,
    outbox: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    kill: CancellationToken,
    exit: Option<WorkerExit>,
}

impl WorkerProcess {
    pub fn new(
        id: WorkerId,
        role: WorkerRole,
        outbox: mpsc::UnboundedSender<Message>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        kill: CancellationToken,
    ) -> Self {
        Self {
            id,
            role,
            outbox,
            events,
            kill,
            exit: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Exit status once [`WorkerEvent::Exited`] has been received.
    pub fn exit(&self) -> Option<WorkerExit> {
        self.exit
    }

    pub fn is_connected(&self) -> bool {
        self.exit.is_none() && !self.outbox.is_closed()
    }

    /// Queue a message for the worker.
    ///
    /// Fails with [`CoreError::ChannelClosed`] once the worker's input is gone.
    pub fn send(&self, msg: Message) -> Result<(), CoreError> {
        if self.exit.is_some() {
            return Err(CoreError::ChannelClosed(self.id));
        }
        self.outbox
            .send(msg)
            .map_err(|_| CoreError::ChannelClosed(self.id))
    }

    /// Next event, or `None` after the exit has already been delivered.
    ///
    /// A launcher that drops its side without reporting an exit is treated
    /// as a worker killed by a signal.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        if self.exit.is_some() {
            return None;
        }
        let event = self
            .events
            .recv()
            .await
            .unwrap_or(WorkerEvent::Exited(WorkerExit::signaled()));
        if let WorkerEvent::Exited(exit) = &event {
            self.exit = Some(*exit);
        }
        Some(event)
    }

    /// Terminate the OS process unconditionally.
    pub fn kill(&self) {
        self.kill.cancel();
    }
}

impl fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("exit", &self.exit)
            .finish()
    }
}

/// Spawns worker processes for the slots.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(&self, env: &WorkerEnv) -> Result<WorkerProcess, CoreError>;
}
