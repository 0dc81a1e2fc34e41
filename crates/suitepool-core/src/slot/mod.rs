//! Server slot: one long-lived server worker plus a rotating runner.
//!
//! Each slot is a task owning its workers. The coordinator drives it through
//! a [`SlotHandle`] and listens to the [`SlotEvent`]s it emits; everything
//! the slot does not interpret itself is relayed between its two workers.
mod state;
pub use state::SlotState;

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use suitepool_model::{
    Message, PortBlock, ResultEvent, SuiteRef, WorkerEnv, WorkerRecord, WorkerRole,
};

use crate::{
    error::CoreError,
    launcher::{WorkerEvent, WorkerExit, WorkerLauncher, WorkerProcess},
    registry::WorkerRegistry,
};

/// Index of a slot in the coordinator's pool.
pub type SlotId = usize;

/// Requests from the coordinator to a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCommand {
    /// Fork a runner for the suite.
    Run(SuiteRef),
    /// Finish the current suite (if any), then stop.
    Disconnect,
    /// Stop now.
    DisconnectNow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotEventKind {
    /// The slot can take a suite.
    ReadyForTests,
    TestResults {
        suite: SuiteRef,
        event: ResultEvent,
    },
    SuiteDone(SuiteRef),
    /// A worker ended with a failure status outside of shutdown.
    WorkerFailed {
        role: WorkerRole,
        suite: Option<SuiteRef>,
        exit: WorkerExit,
    },
    /// Both workers are gone; always the last event of a slot.
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotEvent {
    pub slot: SlotId,
    pub kind: SlotEventKind,
}

/// Coordinator side of a running slot.
#[derive(Debug, Clone)]
pub struct SlotHandle {
    id: SlotId,
    ports: PortBlock,
    commands: mpsc::UnboundedSender<SlotCommand>,
}

impl SlotHandle {
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.ports.primary
    }

    pub fn ports(&self) -> &PortBlock {
        &self.ports
    }

    /// Returns `false` when the slot task is already gone.
    pub fn run(&self, suite: SuiteRef) -> bool {
        self.send(SlotCommand::Run(suite))
    }

    pub fn disconnect(&self) -> bool {
        self.send(SlotCommand::Disconnect)
    }

    pub fn disconnect_now(&self) -> bool {
        self.send(SlotCommand::DisconnectNow)
    }

    fn send(&self, cmd: SlotCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }
}

struct ActiveRunner {
    process: WorkerProcess,
    record: WorkerRecord,
    suite: SuiteRef,
}

pub struct ServerSlot {
    id: SlotId,
    env: WorkerEnv,
    launcher: Arc<dyn WorkerLauncher>,
    registry: WorkerRegistry,
    events: mpsc::UnboundedSender<SlotEvent>,
    commands: mpsc::UnboundedReceiver<SlotCommand>,
    shutdown_timeout: Duration,

    state: SlotState,
    server: WorkerProcess,
    server_record: WorkerRecord,
    runner: Option<ActiveRunner>,
}

enum Step {
    Command(Option<SlotCommand>),
    Server(Option<WorkerEvent>),
    Runner(Option<WorkerEvent>),
}

impl ServerSlot {
    /// Fork the server worker of slot `id` and start the slot task.
    ///
    /// `env` is the server's launch contract; runners derive theirs from it.
    pub async fn spawn(
        id: SlotId,
        env: WorkerEnv,
        launcher: Arc<dyn WorkerLauncher>,
        registry: WorkerRegistry,
        events: mpsc::UnboundedSender<SlotEvent>,
        shutdown_timeout: Duration,
    ) -> Result<(SlotHandle, JoinHandle<()>), CoreError> {
        let server = launcher.launch(&env).await?;
        let server_record = registry.register_server(server.id());
        info!(
            target: "suitepool.slot",
            slot = id,
            port = env.ports.primary,
            server = %server_record.custom_id,
            "server worker forked"
        );

        let (tx, commands) = mpsc::unbounded_channel();
        let handle = SlotHandle {
            id,
            ports: env.ports.clone(),
            commands: tx,
        };
        let slot = ServerSlot {
            id,
            env,
            launcher,
            registry,
            events,
            commands,
            shutdown_timeout,
            state: SlotState::Idle,
            server,
            server_record,
            runner: None,
        };
        Ok((handle, tokio::spawn(slot.run())))
    }

    async fn run(mut self) {
        while !self.state.is_stopping() {
            let server_alive = self.server.exit().is_none();
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                ev = self.server.recv(), if server_alive => Step::Server(ev),
                ev = recv_runner(&mut self.runner) => Step::Runner(ev),
            };
            match step {
                // Coordinator went away: nobody is left to hand out work.
                Step::Command(None) => self.state = self.state.on_disconnect_now(),
                Step::Command(Some(cmd)) => self.on_command(cmd).await,
                Step::Server(Some(ev)) => self.on_server_event(ev),
                Step::Runner(Some(ev)) => self.on_runner_event(ev),
                Step::Server(None) | Step::Runner(None) => {}
            }
        }

        self.shutdown().await;
        self.state = SlotState::Terminated;
        debug!(target: "suitepool.slot", slot = self.id, "slot terminated");
        self.emit(SlotEventKind::Terminated);
    }

    async fn on_command(&mut self, cmd: SlotCommand) {
        match cmd {
            SlotCommand::Run(suite) => match self.state.on_run() {
                Some(next) => self.fork_runner(suite, next).await,
                None => warn!(
                    target: "suitepool.slot",
                    slot = self.id,
                    state = %self.state,
                    %suite,
                    "slot is busy, suite rejected"
                ),
            },
            SlotCommand::Disconnect => self.state = self.state.on_disconnect(),
            SlotCommand::DisconnectNow => self.state = self.state.on_disconnect_now(),
        }
    }

    async fn fork_runner(&mut self, suite: SuiteRef, next: SlotState) {
        let env = self.env.runner(suite.clone());
        match self.launcher.launch(&env).await {
            Ok(process) => {
                let record = self.registry.register_runner(process.id());
                debug!(
                    target: "suitepool.slot",
                    slot = self.id,
                    runner = %record.custom_id,
                    %suite,
                    "runner worker forked"
                );
                self.runner = Some(ActiveRunner {
                    process,
                    record,
                    suite,
                });
                self.state = next;
            }
            Err(err) => {
                warn!(target: "suitepool.slot", slot = self.id, %suite, error = %err, "failed to fork runner");
                self.emit(SlotEventKind::WorkerFailed {
                    role: WorkerRole::Runner,
                    suite: Some(suite),
                    exit: WorkerExit::signaled(),
                });
                self.emit(SlotEventKind::ReadyForTests);
            }
        }
    }

    fn on_server_event(&mut self, ev: WorkerEvent) {
        match ev {
            WorkerEvent::Message(Message::ReadyForTests) => {
                if self.state.accepts_work() {
                    self.emit(SlotEventKind::ReadyForTests);
                } else {
                    debug!(target: "suitepool.slot", slot = self.id, state = %self.state, "server ready while busy");
                }
            }
            WorkerEvent::Message(msg) => {
                let Some(runner) = &self.runner else {
                    debug!(target: "suitepool.slot", slot = self.id, kind = msg.kind(), "no runner to receive server message");
                    return;
                };
                if let Err(err) = runner.process.send(msg.clone()) {
                    debug!(
                        target: "suitepool.slot",
                        slot = self.id,
                        runner = %runner.record,
                        kind = msg.kind(),
                        error = %err,
                        "unable to forward server message to runner"
                    );
                }
            }
            WorkerEvent::Exited(exit) => {
                warn!(
                    target: "suitepool.slot",
                    slot = self.id,
                    server = %self.server_record,
                    %exit,
                    "server worker exited unexpectedly"
                );
                self.emit(SlotEventKind::WorkerFailed {
                    role: WorkerRole::Server,
                    suite: self.runner.as_ref().map(|r| r.suite.clone()),
                    exit,
                });
                self.state = self.state.on_disconnect_now();
            }
        }
    }

    fn on_runner_event(&mut self, ev: WorkerEvent) {
        let Some(runner) = self.runner.as_ref() else {
            return;
        };
        match ev {
            WorkerEvent::Message(Message::TestResults { event }) => {
                let suite = runner.suite.clone();
                self.emit(SlotEventKind::TestResults { suite, event });
            }
            WorkerEvent::Message(Message::SuiteDone { suite }) => {
                self.emit(SlotEventKind::SuiteDone(suite));
            }
            WorkerEvent::Message(msg) => {
                let msg = msg.with_runner_id(runner.process.id());
                if let Err(err) = self.server.send(msg.clone()) {
                    warn!(
                        target: "suitepool.slot",
                        slot = self.id,
                        runner = %runner.record,
                        kind = msg.kind(),
                        error = %err,
                        "unable to forward runner message to server"
                    );
                    // The server can no longer be reached: fail the run like a server crash.
                    let suite = runner.suite.clone();
                    self.emit(SlotEventKind::WorkerFailed {
                        role: WorkerRole::Server,
                        suite: Some(suite),
                        exit: WorkerExit::signaled(),
                    });
                    self.state = self.state.on_disconnect_now();
                }
            }
            WorkerEvent::Exited(exit) => {
                let Some(done) = self.runner.take() else {
                    return;
                };
                debug!(
                    target: "suitepool.slot",
                    slot = self.id,
                    runner = %done.record,
                    %exit,
                    "runner worker exited"
                );
                if !exit.success() {
                    self.emit(SlotEventKind::WorkerFailed {
                        role: WorkerRole::Runner,
                        suite: Some(done.suite),
                        exit,
                    });
                }
                self.state = self.state.on_runner_exit();
                if self.state.accepts_work() {
                    self.emit(SlotEventKind::ReadyForTests);
                }
            }
        }
    }

    /// Stop the runner (if any), then the server, each with [`clean_kill`].
    async fn shutdown(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            let events = self.events.clone();
            let slot = self.id;
            let suite = runner.suite.clone();
            let custom_id = Some(runner.record.custom_id.clone());
            let label = runner.record.to_string();
            clean_kill(
                &mut runner.process,
                &label,
                custom_id,
                self.shutdown_timeout,
                |msg| {
                    let kind = match msg {
                        Message::TestResults { event } => SlotEventKind::TestResults {
                            suite: suite.clone(),
                            event,
                        },
                        Message::SuiteDone { suite } => SlotEventKind::SuiteDone(suite),
                        _ => return,
                    };
                    let _ = events.send(SlotEvent { slot, kind });
                },
            )
            .await;
        }

        let label = self.registry.describe(self.server.id());
        let custom_id = Some(self.server_record.custom_id.clone());
        clean_kill(
            &mut self.server,
            &label,
            custom_id,
            self.shutdown_timeout,
            |_| {},
        )
        .await;
    }

    fn emit(&self, kind: SlotEventKind) {
        if self.events.send(SlotEvent { slot: self.id, kind }).is_err() {
            debug!(target: "suitepool.slot", slot = self.id, "coordinator is gone, event dropped");
        }
    }
}

async fn recv_runner(runner: &mut Option<ActiveRunner>) -> Option<WorkerEvent> {
    match runner {
        Some(r) => r.process.recv().await,
        None => std::future::pending().await,
    }
}

/// Two-phase stop of one worker.
///
/// Sends `shutdown` and waits for the worker to exit; once `timeout`
/// elapses the process is killed. Messages arriving meanwhile go to
/// `on_message`.
pub async fn clean_kill<F>(
    worker: &mut WorkerProcess,
    label: &str,
    custom_id: Option<String>,
    timeout: Duration,
    mut on_message: F,
) -> WorkerExit
where
    F: FnMut(Message),
{
    if let Some(exit) = worker.exit() {
        return exit;
    }
    if let Err(err) = worker.send(Message::Shutdown { custom_id }) {
        debug!(target: "suitepool.slot", worker = label, error = %err, "shutdown not delivered, killing");
        worker.kill();
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut killed = false;
    loop {
        tokio::select! {
            ev = worker.recv() => match ev {
                Some(WorkerEvent::Message(msg)) => on_message(msg),
                Some(WorkerEvent::Exited(exit)) => return exit,
                None => return worker.exit().unwrap_or_else(WorkerExit::signaled),
            },
            _ = &mut deadline, if !killed => {
                debug!(
                    target: "suitepool.slot",
                    worker = label,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker ignored shutdown, killing"
                );
                worker.kill();
                killed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    /// Worker whose "OS side" is driven by the test.
    fn worker(
        id: u32,
    ) -> (
        WorkerProcess,
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedSender<WorkerEvent>,
        CancellationToken,
    ) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();
        let process = WorkerProcess::new(id, WorkerRole::Runner, outbox, events, kill.clone());
        (process, inbox, events_tx, kill)
    }

    #[tokio::test(start_paused = true)]
    async fn clean_kill_returns_on_acknowledged_shutdown() {
        let (mut process, mut inbox, events, kill) = worker(5);
        let os = tokio::spawn(async move {
            let msg = inbox.recv().await;
            assert_eq!(
                msg,
                Some(Message::Shutdown {
                    custom_id: Some("r-1".into())
                })
            );
            events
                .send(WorkerEvent::Exited(WorkerExit::code(0)))
                .unwrap();
        });

        let exit = clean_kill(
            &mut process,
            "runner r-1",
            Some("r-1".into()),
            Duration::from_secs(4),
            |_| {},
        )
        .await;
        os.await.unwrap();
        assert!(exit.success());
        assert!(!kill.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn clean_kill_forces_a_hung_worker() {
        let (mut process, _inbox, events, kill) = worker(6);
        let watcher = kill.clone();
        tokio::spawn(async move {
            watcher.cancelled().await;
            let _ = events.send(WorkerEvent::Exited(WorkerExit::signaled()));
        });

        let start = tokio::time::Instant::now();
        let exit = clean_kill(&mut process, "runner r-2", None, Duration::from_secs(4), |_| {}).await;

        assert!(kill.is_cancelled());
        assert_eq!(exit, WorkerExit::signaled());
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn clean_kill_passes_late_messages_through() {
        let (mut process, _inbox, events, _kill) = worker(7);
        events
            .send(WorkerEvent::Message(Message::SuiteDone {
                suite: SuiteRef::new("a.t"),
            }))
            .unwrap();
        events
            .send(WorkerEvent::Exited(WorkerExit::code(0)))
            .unwrap();

        let mut seen = Vec::new();
        clean_kill(&mut process, "runner r-3", None, Duration::from_secs(4), |m| {
            seen.push(m.kind())
        })
        .await;
        assert_eq!(seen, vec!["suiteDone"]);
    }

    #[tokio::test]
    async fn clean_kill_on_exited_worker_is_a_no_op() {
        let (mut process, mut inbox, events, kill) = worker(8);
        events
            .send(WorkerEvent::Exited(WorkerExit::code(1)))
            .unwrap();
        process.recv().await;

        let exit = clean_kill(&mut process, "runner r-4", None, Duration::from_secs(4), |_| {}).await;
        assert_eq!(exit, WorkerExit::code(1));
        assert!(!kill.is_cancelled());
        assert!(inbox.try_recv().is_err());
    }
}
