//! Runner role: executes exactly one suite and streams its results.
//!
//! The suite runs as a child process; a [`SuiteAdapter`] knows how to start
//! it and how to turn its stdout into [`AdapterEvent`]s.
mod cucumber;
mod tap;

pub use cucumber::{CucumberAdapter, CucumberParser};
pub use tap::{TapAdapter, TapParser};

use std::{
    process::Stdio,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    time::Instant,
};
use tracing::{debug, info, warn};

use suitepool_exec::{ExecError, terminate};
use suitepool_model::{
    Message, ModelError, ResultEvent, SuiteRef, SuiteType, TestFailure, TestInfo, WorkerEnv, vars,
};

use crate::{
    channel::{Inbox, ParentChannel},
    error::WorkerError,
    watchdog::{MemorySampler, Watchdog},
};

const STOP_GRACE: Duration = Duration::from_secs(1);

/// What a suite's output means to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Result(ResultEvent),
    /// Number of tests the framework intends to run.
    Plan(u32),
    /// The suite asks the server to reset its mocks.
    ClearMocks,
}

pub trait OutputParser: Send {
    fn line(&mut self, line: &str, at: std::time::Instant) -> Vec<AdapterEvent>;

    /// End of output; `exit` is the suite's exit code (`None` if signalled).
    fn finish(&mut self, exit: Option<i32>, at: std::time::Instant) -> Vec<AdapterEvent>;
}

pub trait SuiteAdapter: Send + Sync {
    fn command(&self, env: &WorkerEnv, suite: &SuiteRef) -> Command;

    fn parser(&self, env: &WorkerEnv, suite: &SuiteRef) -> Box<dyn OutputParser>;
}

pub fn adapter_for(suite_type: SuiteType) -> &'static dyn SuiteAdapter {
    match suite_type {
        SuiteType::Tap => &TapAdapter,
        SuiteType::Cucumber => &CucumberAdapter,
    }
}

/// `sh -c '<command> "$@"'` with `args` as positional parameters, so paths
/// never need quoting.
pub(crate) fn shell<I, S>(command: &str, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(format!("{command} \"$@\"")).arg("sh").args(args);
    cmd
}

/// Failure raised by the runner itself rather than by a test.
pub(crate) fn suite_failure(suite: &SuiteRef, slow_ms: u64, message: impl Into<String>) -> ResultEvent {
    ResultEvent::TestFailed {
        test: TestInfo {
            full_title: suite.to_string(),
            duration_ms: None,
            slow_ms,
        },
        error: TestFailure::new(message),
    }
}

fn exit_description(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("suite exited with code {code} without reporting a failure"),
        None => "suite was terminated by a signal without reporting a failure".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerOutcome {
    /// The suite ran to completion and `suiteDone` was sent.
    Completed,
    /// No output within the inactivity timeout; reported as a failure.
    TimedOut,
    /// The slot asked us to stop.
    Stopped,
}

struct SuiteRun<'a> {
    channel: &'a ParentChannel,
    watchdog: Watchdog,
    sampler: MemorySampler,
}

impl SuiteRun<'_> {
    fn apply(&mut self, events: Vec<AdapterEvent>) -> Result<(), WorkerError> {
        for event in events {
            match event {
                AdapterEvent::Plan(total) => self.watchdog.on_plan(total),
                AdapterEvent::ClearMocks => {
                    let start = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or_default();
                    self.channel.send(Message::ClearMocks {
                        start,
                        runner_id: None,
                    })?;
                }
                AdapterEvent::Result(event) => {
                    if event.is_failure() {
                        self.watchdog.mark_failed();
                    }
                    if event.ends_test() {
                        let failed = matches!(event, ResultEvent::ScenarioFinished { failed: true, .. });
                        self.watchdog.on_test_end(failed, self.sampler.sample_mb());
                    }
                    self.channel.send(Message::TestResults { event })?;
                }
            }
        }
        Ok(())
    }
}

/// Run the suite named by `WORKER_TEST`.
pub async fn run_runner(
    env: &WorkerEnv,
    channel: &ParentChannel,
    inbox: &mut Inbox,
) -> Result<RunnerOutcome, WorkerError> {
    let suite = env
        .suite
        .clone()
        .ok_or(ModelError::MissingVar(vars::WORKER_TEST))?;
    channel.send(Message::RunnerId {
        runner_id: std::process::id(),
    })?;
    run_suite(adapter_for(env.suite_type), env, &suite, channel, inbox).await
}

pub async fn run_suite(
    adapter: &dyn SuiteAdapter,
    env: &WorkerEnv,
    suite: &SuiteRef,
    channel: &ParentChannel,
    inbox: &mut Inbox,
) -> Result<RunnerOutcome, WorkerError> {
    let mut child = spawn_suite(adapter, env, suite)?;
    let stdout = child
        .stdout
        .take()
        .ok_or(ExecError::MissingPipe("stdout"))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut parser = adapter.parser(env, suite);

    let mut run = SuiteRun {
        channel,
        watchdog: Watchdog::new(env.limits, suite.clone()),
        sampler: MemorySampler::new(),
    };
    if let Some(pid) = child.id() {
        run.sampler.track(pid);
    }
    info!(target: "suitepool.worker", %suite, "running suite");

    let timeout = Duration::from_millis(env.limits.timeout_ms);
    let mut deadline = Instant::now() + timeout;
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    deadline = Instant::now() + timeout;
                    run.apply(parser.line(&line, std::time::Instant::now()))?;
                }
                Ok(None) => break RunnerOutcome::Completed,
                Err(err) => {
                    warn!(target: "suitepool.worker", %suite, error = %err, "suite output unreadable");
                    break RunnerOutcome::Completed;
                }
            },
            msg = inbox.recv() => match msg {
                Some(Message::Shutdown { .. }) | None => break RunnerOutcome::Stopped,
                Some(other) => {
                    debug!(target: "suitepool.worker", kind = other.kind(), "runner ignores message");
                }
            },
            _ = tokio::time::sleep_until(deadline) => break RunnerOutcome::TimedOut,
        }
    };

    match outcome {
        RunnerOutcome::Completed => {
            let status = child.wait().await?;
            run.apply(parser.finish(status.code(), std::time::Instant::now()))?;
        }
        RunnerOutcome::TimedOut => {
            warn!(target: "suitepool.worker", %suite, timeout_ms = env.limits.timeout_ms, "suite stopped producing output");
            stop_suite(&mut child).await;
            run.apply(vec![AdapterEvent::Result(suite_failure(
                suite,
                env.limits.slow_ms,
                format!("no output for {}ms, suite timed out", env.limits.timeout_ms),
            ))])?;
        }
        RunnerOutcome::Stopped => {
            debug!(target: "suitepool.worker", %suite, "stop requested, abandoning suite");
            stop_suite(&mut child).await;
            return Ok(outcome);
        }
    }

    run.watchdog.check_memory(run.sampler.sample_mb());
    run.watchdog.finish();
    channel.send(Message::SuiteDone {
        suite: suite.clone(),
    })?;
    Ok(outcome)
}

fn spawn_suite(adapter: &dyn SuiteAdapter, env: &WorkerEnv, suite: &SuiteRef) -> Result<Child, WorkerError> {
    let mut cmd = adapter.command(env, suite);
    cmd.envs(env.to_vars().into_iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    cmd.spawn().map_err(|e| WorkerError::Spawn {
        what: suite.to_string(),
        reason: e.to_string(),
    })
}

async fn stop_suite(child: &mut Child) {
    if let Err(err) = terminate(child, STOP_GRACE).await {
        warn!(target: "suitepool.worker", error = %err, "failed to stop suite process");
    }
}
