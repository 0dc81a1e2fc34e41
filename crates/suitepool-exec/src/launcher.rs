//! [`WorkerLauncher`] backed by real child processes.
use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{process::Command, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use suitepool_core::{CoreError, WorkerEvent, WorkerExit, WorkerLauncher, WorkerProcess};
use suitepool_model::{Message, WorkerEnv, WorkerId};

use crate::{
    error::{ExecError, ExecResult},
    framing::{MessageReader, MessageWriter},
    limits::{ProcessLimits, attach_limits},
    util::kill_now,
};

/// How long the stdout reader may lag behind the process exit.
const READER_GRACE: Duration = Duration::from_secs(1);

/// Spawns workers by executing `program` with the launch contract in its
/// environment; stdin/stdout carry the message channel, stderr is inherited.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    limits: ProcessLimits,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            limits: ProcessLimits::default(),
        }
    }

    /// Re-execute the running binary; it must dispatch on `WORKER_SCRIPT`.
    pub fn current_exe() -> ExecResult<Self> {
        let exe = std::env::current_exe().map_err(|e| ExecError::Spawn(format!("current executable: {e}")))?;
        Ok(Self::new(exe))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Extra variables exported to every worker.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }

    fn command(&self, env: &WorkerEnv) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        for (k, v) in env.to_vars() {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        attach_limits(&mut cmd, &self.limits);
        cmd
    }

    fn spawn(&self, env: &WorkerEnv) -> ExecResult<WorkerProcess> {
        trace!(target: "suitepool.exec", program = %self.program.display(), role = env.role.script(), "spawn");

        let mut child = self
            .command(env)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", self.program.display())))?;
        let id: WorkerId = child
            .id()
            .ok_or_else(|| ExecError::Spawn("process exited before it started".into()))?;
        let stdin = child.stdin.take().ok_or(ExecError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ExecError::MissingPipe("stdout"))?;

        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();

        // parent -> worker
        tokio::spawn(async move {
            let mut writer = MessageWriter::new(stdin);
            while let Some(msg) = outbox_rx.recv().await {
                if let Err(err) = writer.send(&msg).await {
                    debug!(target: "suitepool.exec", pid = id, kind = msg.kind(), error = %err, "worker input closed");
                    break;
                }
            }
        });

        // worker -> parent
        let reader_tx = events_tx.clone();
        let reader = tokio::spawn(async move {
            let mut reader = MessageReader::new(stdout);
            loop {
                match reader.next().await {
                    Ok(Some(Ok(msg))) => {
                        if reader_tx.send(WorkerEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Ok(Some(Err(line))) => {
                        warn!(target: "suitepool.exec", pid = id, %line, "ignoring non-protocol output");
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(target: "suitepool.exec", pid = id, error = %err, "worker output closed");
                        break;
                    }
                }
            }
        });

        let killer = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = killer.cancelled() => {
                    debug!(target: "suitepool.exec", pid = id, "killing worker");
                    kill_now(&mut child).await
                }
            };
            let exit = match status {
                Ok(status) => WorkerExit { code: status.code() },
                Err(err) => {
                    warn!(target: "suitepool.exec", pid = id, error = %err, "unable to reap worker");
                    WorkerExit::signaled()
                }
            };
            // Everything the worker wrote must be delivered before its exit.
            if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
                debug!(target: "suitepool.exec", pid = id, "worker output still open after exit");
            }
            debug!(target: "suitepool.exec", pid = id, %exit, "worker exited");
            let _ = events_tx.send(WorkerEvent::Exited(exit));
        });

        Ok(WorkerProcess::new(id, env.role, outbox, events, kill))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, env: &WorkerEnv) -> Result<WorkerProcess, CoreError> {
        Ok(self.spawn(env)?)
    }
}
