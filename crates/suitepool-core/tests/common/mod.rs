#![allow(dead_code)]
//! In-memory worker processes for driving the coordinator in tests.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use suitepool_core::{CoreError, WorkerEvent, WorkerExit, WorkerLauncher, WorkerProcess};
use suitepool_model::{
    Message, ResultEvent, SuiteRef, TestFailure, TestInfo, WorkerEnv, WorkerId, WorkerRole,
};

/// Behaviour of a runner for one suite.
#[derive(Debug, Clone)]
pub enum RunnerScript {
    /// `tests` passing tests, then `suiteDone`, exit 0.
    Pass { tests: u32 },
    /// One passing and one failing test, then `suiteDone`, exit 0.
    Fail,
    /// One passing test, then exit 1 without `suiteDone`.
    Crash,
    /// Pass after `delay`.
    Slow { delay: Duration },
    /// Ask the server to clear mocks, then pass.
    ClearMocks,
    /// Never report anything and ignore `shutdown`; only a kill ends it.
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    pub id: WorkerId,
    pub role: WorkerRole,
    pub port: u16,
    pub suite: Option<SuiteRef>,
}

#[derive(Default)]
struct Shared {
    launches: Vec<Launch>,
    /// Messages received by server workers, keyed by port.
    server_inbox: HashMap<u16, Vec<Message>>,
    live_runners: HashMap<u16, usize>,
    max_runners_per_port: usize,
    max_runners_total: usize,
    killed: Vec<WorkerId>,
}

#[derive(Clone)]
pub struct FakeLauncher {
    scripts: Arc<HashMap<String, RunnerScript>>,
    default: RunnerScript,
    server_ignores_shutdown: bool,
    server_input_broken: bool,
    fail_server_launch_after: Option<usize>,
    next_id: Arc<AtomicU32>,
    shared: Arc<Mutex<Shared>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(HashMap::new()),
            default: RunnerScript::Pass { tests: 2 },
            server_ignores_shutdown: false,
            server_input_broken: false,
            fail_server_launch_after: None,
            next_id: Arc::new(AtomicU32::new(1000)),
            shared: Arc::default(),
        }
    }

    pub fn script(mut self, suite: &str, script: RunnerScript) -> Self {
        Arc::make_mut(&mut self.scripts).insert(suite.to_string(), script);
        self
    }

    pub fn default_script(mut self, script: RunnerScript) -> Self {
        self.default = script;
        self
    }

    pub fn server_ignores_shutdown(mut self) -> Self {
        self.server_ignores_shutdown = true;
        self
    }

    /// Servers drop their input channel at launch but stay alive until killed.
    pub fn server_input_broken(mut self) -> Self {
        self.server_input_broken = true;
        self
    }

    pub fn fail_server_launch_after(mut self, servers: usize) -> Self {
        self.fail_server_launch_after = Some(servers);
        self
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.shared.lock().unwrap().launches.clone()
    }

    pub fn launches_of(&self, role: WorkerRole) -> Vec<Launch> {
        self.launches().into_iter().filter(|l| l.role == role).collect()
    }

    /// Suites in the order runners were forked.
    pub fn runner_suites(&self) -> Vec<String> {
        self.launches_of(WorkerRole::Runner)
            .into_iter()
            .filter_map(|l| l.suite.map(|s| s.to_string()))
            .collect()
    }

    pub fn server_inbox(&self, port: u16) -> Vec<Message> {
        self.shared
            .lock()
            .unwrap()
            .server_inbox
            .get(&port)
            .cloned()
            .unwrap_or_default()
    }

    pub fn max_runners_per_port(&self) -> usize {
        self.shared.lock().unwrap().max_runners_per_port
    }

    pub fn max_runners_total(&self) -> usize {
        self.shared.lock().unwrap().max_runners_total
    }

    pub fn killed(&self) -> Vec<WorkerId> {
        self.shared.lock().unwrap().killed.clone()
    }

    fn runner_started(&self, port: u16) {
        let mut shared = self.shared.lock().unwrap();
        let live = shared.live_runners.entry(port).or_default();
        *live += 1;
        let on_port = *live;
        let total: usize = shared.live_runners.values().sum();
        shared.max_runners_per_port = shared.max_runners_per_port.max(on_port);
        shared.max_runners_total = shared.max_runners_total.max(total);
    }

    fn runner_stopped(&self, port: u16) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(live) = shared.live_runners.get_mut(&port) {
            *live -= 1;
        }
    }

    fn record_kill(&self, id: WorkerId) {
        self.shared.lock().unwrap().killed.push(id);
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self, env: &WorkerEnv) -> Result<WorkerProcess, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let port = env.ports.primary;
        {
            let mut shared = self.shared.lock().unwrap();
            if env.role == WorkerRole::Server {
                let servers = shared
                    .launches
                    .iter()
                    .filter(|l| l.role == WorkerRole::Server)
                    .count();
                if self.fail_server_launch_after.is_some_and(|n| servers >= n) {
                    return Err(CoreError::Launch("fork refused".into()));
                }
            }
            shared.launches.push(Launch {
                id,
                role: env.role,
                port,
                suite: env.suite.clone(),
            });
        }

        let (outbox, inbox) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();

        match env.role {
            WorkerRole::Server => {
                let inbox = (!self.server_input_broken).then_some(inbox);
                tokio::spawn(fake_server(
                    self.clone(),
                    id,
                    port,
                    inbox,
                    events_tx,
                    kill.clone(),
                ));
            }
            WorkerRole::Runner => {
                let suite = env.suite.clone().unwrap_or_else(|| SuiteRef::new("?"));
                let script = self
                    .scripts
                    .get(suite.as_str())
                    .cloned()
                    .unwrap_or_else(|| self.default.clone());
                self.runner_started(port);
                tokio::spawn(fake_runner(
                    self.clone(),
                    id,
                    port,
                    suite,
                    script,
                    inbox,
                    events_tx,
                    kill.clone(),
                ));
            }
        }

        Ok(WorkerProcess::new(id, env.role, outbox, events, kill))
    }
}

async fn fake_server(
    launcher: FakeLauncher,
    id: WorkerId,
    port: u16,
    inbox: Option<mpsc::UnboundedReceiver<Message>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    kill: CancellationToken,
) {
    let _ = events.send(WorkerEvent::Message(Message::ReadyForTests));
    let Some(mut inbox) = inbox else {
        kill.cancelled().await;
        launcher.record_kill(id);
        let _ = events.send(WorkerEvent::Exited(WorkerExit::signaled()));
        return;
    };
    loop {
        tokio::select! {
            _ = kill.cancelled() => {
                launcher.record_kill(id);
                let _ = events.send(WorkerEvent::Exited(WorkerExit::signaled()));
                return;
            }
            msg = inbox.recv() => match msg {
                Some(Message::Shutdown { .. }) if !launcher.server_ignores_shutdown => {
                    let _ = events.send(WorkerEvent::Exited(WorkerExit::code(0)));
                    return;
                }
                Some(msg) => {
                    let mut shared = launcher.shared.lock().unwrap();
                    shared.server_inbox.entry(port).or_default().push(msg);
                }
                None => {
                    let _ = events.send(WorkerEvent::Exited(WorkerExit::code(0)));
                    return;
                }
            },
        }
    }
}

fn passed(title: String) -> Message {
    Message::TestResults {
        event: ResultEvent::TestPassed {
            test: TestInfo {
                full_title: title,
                duration_ms: Some(1),
                slow_ms: 10_000,
            },
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn fake_runner(
    launcher: FakeLauncher,
    id: WorkerId,
    port: u16,
    suite: SuiteRef,
    script: RunnerScript,
    mut inbox: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    kill: CancellationToken,
) {
    let send = |msg: Message| {
        let _ = events.send(WorkerEvent::Message(msg));
    };
    send(Message::RunnerId { runner_id: id });

    let exit = match script {
        RunnerScript::Pass { tests } => {
            for n in 0..tests {
                send(passed(format!("{suite} #{n}")));
            }
            send(Message::SuiteDone { suite });
            WorkerExit::code(0)
        }
        RunnerScript::Fail => {
            send(passed(format!("{suite} ok")));
            send(Message::TestResults {
                event: ResultEvent::TestFailed {
                    test: TestInfo {
                        full_title: format!("{suite} broken"),
                        duration_ms: Some(1),
                        slow_ms: 10_000,
                    },
                    error: TestFailure::new("expected true"),
                },
            });
            send(Message::SuiteDone { suite });
            WorkerExit::code(0)
        }
        RunnerScript::Crash => {
            send(passed(format!("{suite} ok")));
            WorkerExit::code(1)
        }
        RunnerScript::ClearMocks => {
            send(Message::ClearMocks {
                start: 42,
                runner_id: None,
            });
            send(passed(format!("{suite} ok")));
            send(Message::SuiteDone { suite });
            WorkerExit::code(0)
        }
        RunnerScript::Slow { delay } => {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    send(passed(format!("{suite} ok")));
                    send(Message::SuiteDone { suite });
                    WorkerExit::code(0)
                }
                Some(Message::Shutdown { .. }) = inbox.recv() => WorkerExit::code(0),
                _ = kill.cancelled() => {
                    launcher.record_kill(id);
                    WorkerExit::signaled()
                }
            }
        }
        RunnerScript::Hang => {
            let mut open = true;
            loop {
                tokio::select! {
                    _ = kill.cancelled() => break,
                    msg = inbox.recv(), if open => open = msg.is_some(),
                }
            }
            launcher.record_kill(id);
            WorkerExit::signaled()
        }
    };

    launcher.runner_stopped(port);
    let _ = events.send(WorkerEvent::Exited(exit));
}
