//! Server role: boots the system under test and keeps it up for the
//! runners that the slot forks against it.
use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    process::{Child, ChildStdin, Command},
    time::Instant,
};
use tracing::{debug, info, warn};

use suitepool_exec::{MessageWriter, terminate};
use suitepool_model::{Message, WorkerEnv};

use crate::{
    channel::{Inbox, ParentChannel},
    error::WorkerError,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// The system under test as seen by the server role.
#[async_trait]
pub trait ServerAdapter: Send {
    /// Returns once the system accepts traffic.
    async fn start(&mut self) -> Result<(), WorkerError>;

    /// A message relayed from a runner.
    async fn handle(&mut self, msg: &Message) -> Result<(), WorkerError>;

    /// Resolves if the system goes away on its own.
    async fn exited(&mut self) -> String;

    async fn stop(&mut self);
}

/// Nothing to boot; ready right away.
#[derive(Debug, Default)]
pub struct IdleServer;

#[async_trait]
impl ServerAdapter for IdleServer {
    async fn start(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn handle(&mut self, msg: &Message) -> Result<(), WorkerError> {
        debug!(target: "suitepool.worker", kind = msg.kind(), "no server command, ignoring message");
        Ok(())
    }

    async fn exited(&mut self) -> String {
        std::future::pending().await
    }

    async fn stop(&mut self) {}
}

/// Runs `SERVER_COMMAND` through `sh -c` and waits for it to listen on the
/// primary port.
pub struct CommandServer {
    command: String,
    port: u16,
    vars: Vec<(&'static str, String)>,
    startup: Duration,
    child: Option<Child>,
    stdin: Option<MessageWriter<ChildStdin>>,
}

impl CommandServer {
    pub fn new(command: impl Into<String>, env: &WorkerEnv) -> Self {
        Self {
            command: command.into(),
            port: env.ports.primary,
            vars: env.to_vars(),
            startup: Duration::from_millis(env.limits.timeout_ms),
            child: None,
            stdin: None,
        }
    }

    pub fn with_startup_timeout(mut self, startup: Duration) -> Self {
        self.startup = startup;
        self
    }

    async fn wait_listening(&mut self) -> Result<(), WorkerError> {
        let started = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut()
                && let Some(status) = child.try_wait()?
            {
                return Err(WorkerError::ServerExited(status.to_string()));
            }
            if TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return Ok(());
            }
            if started.elapsed() >= self.startup {
                return Err(WorkerError::NotListening {
                    port: self.port,
                    waited_ms: self.startup.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ServerAdapter for CommandServer {
    async fn start(&mut self) -> Result<(), WorkerError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .envs(self.vars.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Spawn {
                what: self.command.clone(),
                reason: e.to_string(),
            })?;

        self.stdin = child.stdin.take().map(MessageWriter::new);
        // stdout is ours, keep it off the message channel
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "suitepool.worker", "server: {line}");
                }
            });
        }
        self.child = Some(child);

        self.wait_listening().await?;
        info!(target: "suitepool.worker", port = self.port, "server is listening");
        Ok(())
    }

    async fn handle(&mut self, msg: &Message) -> Result<(), WorkerError> {
        match msg {
            Message::ClearMocks { .. } => {
                let Some(stdin) = self.stdin.as_mut() else {
                    return Err(WorkerError::ChannelClosed);
                };
                if let Err(err) = stdin.send(msg).await {
                    self.stdin = None;
                    return Err(err.into());
                }
                Ok(())
            }
            other => {
                debug!(target: "suitepool.worker", kind = other.kind(), "server message");
                Ok(())
            }
        }
    }

    async fn exited(&mut self) -> String {
        match self.child.as_mut() {
            Some(child) => match child.wait().await {
                Ok(status) => status.to_string(),
                Err(err) => err.to_string(),
            },
            None => std::future::pending().await,
        }
    }

    async fn stop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            match terminate(&mut child, STOP_GRACE).await {
                Ok(status) => debug!(target: "suitepool.worker", %status, "server command stopped"),
                Err(err) => warn!(target: "suitepool.worker", error = %err, "failed to stop server command"),
            }
        }
    }
}

pub fn adapter_for(env: &WorkerEnv) -> Box<dyn ServerAdapter> {
    match &env.server_command {
        Some(command) => Box::new(CommandServer::new(command, env)),
        None => Box::new(IdleServer),
    }
}

/// Serve until the slot asks us to stop or goes away.
pub async fn run_server(
    server: &mut dyn ServerAdapter,
    channel: &ParentChannel,
    inbox: &mut Inbox,
) -> Result<(), WorkerError> {
    if let Err(err) = server.start().await {
        server.stop().await;
        return Err(err);
    }
    channel.send(Message::ReadyForTests)?;

    let result = loop {
        tokio::select! {
            msg = inbox.recv() => match msg {
                Some(Message::Shutdown { custom_id }) => {
                    debug!(target: "suitepool.worker", custom_id = custom_id.as_deref().unwrap_or("-"), "shutdown requested");
                    break Ok(());
                }
                Some(msg) => {
                    if let Err(err) = server.handle(&msg).await {
                        warn!(target: "suitepool.worker", kind = msg.kind(), error = %err, "server could not handle message");
                    }
                }
                None => {
                    debug!(target: "suitepool.worker", "parent closed the channel");
                    break Ok(());
                }
            },
            status = server.exited() => break Err(WorkerError::ServerExited(status)),
        }
    };
    server.stop().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::CrashContext;
    use suitepool_model::{PortBlock, SuiteType, WorkerLimits, WorkerRole};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn env(port: u16, command: Option<&str>) -> WorkerEnv {
        let mut env = WorkerEnv::server(
            PortBlock::new(port, Vec::new()),
            WorkerLimits::default(),
            SuiteType::Tap,
        );
        env.server_command = command.map(str::to_string);
        env
    }

    #[tokio::test]
    async fn idle_server_is_ready_and_stops_on_request() {
        let (mut parent_out, worker_in) = tokio::io::duplex(1024);
        let (worker_out, parent_in) = tokio::io::duplex(1024);
        let (mut channel, mut inbox) =
            ParentChannel::new(worker_in, worker_out, CrashContext::new(WorkerRole::Server, None));

        parent_out
            .write_all(b"{\"type\":\"runnerId\",\"runnerId\":7}\n{\"type\":\"shutdown\"}\n")
            .await
            .unwrap();

        let mut server = adapter_for(&env(4100, None));
        run_server(server.as_mut(), &channel, &mut inbox).await.unwrap();
        channel.detach().await;

        let mut lines = BufReader::new(parent_in).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert_eq!(Message::from_line(&first).unwrap(), Message::ReadyForTests);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_server_must_listen_in_time() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut server = CommandServer::new("sleep 30", &env(port, Some("sleep 30")))
            .with_startup_timeout(Duration::from_millis(200));
        let err = server.start().await.unwrap_err();
        server.stop().await;
        assert!(matches!(err, WorkerError::NotListening { .. }), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_server_exiting_early_is_an_error() {
        let mut server = CommandServer::new("exit 4", &env(1, Some("exit 4")))
            .with_startup_timeout(Duration::from_secs(5));
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, WorkerError::ServerExited(_)), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clear_mocks_reach_the_command() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let out = std::env::temp_dir().join(format!("suitepool-mocks-{}-{port}", std::process::id()));
        let command = format!("cat > '{}'", out.display());

        let mut server = CommandServer::new(&command, &env(port, Some(&command)));
        server.start().await.unwrap();
        server
            .handle(&Message::ClearMocks {
                start: 5,
                runner_id: Some(9),
            })
            .await
            .unwrap();

        let mut written = String::new();
        for _ in 0..100 {
            written = std::fs::read_to_string(&out).unwrap_or_default();
            if written.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        server.stop().await;
        let _ = std::fs::remove_file(&out);
        assert_eq!(
            Message::from_line(written.lines().next().unwrap()).unwrap(),
            Message::ClearMocks {
                start: 5,
                runner_id: Some(9)
            }
        );
    }
}
