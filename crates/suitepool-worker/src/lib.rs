//! Worker process runtime.
//!
//! A worker is the orchestrator binary re-executed with `WORKER_SCRIPT`
//! set. It talks to its slot over stdin/stdout and logs to stderr.
//!
//! - `server`: boots the system under test, reports `readyForTests`, then
//!   relays runner requests to it until asked to shut down.
//! - `runner`: announces itself, runs exactly one suite and streams its
//!   results, then reports `suiteDone`.
mod error;
pub use error::WorkerError;

pub mod channel;
pub use channel::{Inbox, ParentChannel};

pub mod crash;
pub use crash::CrashContext;

pub mod runner;
pub use runner::{RunnerOutcome, SuiteAdapter};

pub mod server;
pub use server::{CommandServer, IdleServer, ServerAdapter};

pub mod watchdog;
pub use watchdog::{MemorySampler, ResourceWarning, Watchdog};

use tracing::debug;

use suitepool_model::{WorkerEnv, WorkerRole};

/// Run the role described by `env` over stdin/stdout.
///
/// Returns the process exit status: `0` on a clean stop, `1` if the role
/// failed (the failure is logged with the worker context).
pub async fn run_worker(env: WorkerEnv) -> i32 {
    let crash = CrashContext::new(env.role, env.suite.clone());
    crash::install_panic_hook(crash.clone());

    let (mut channel, mut inbox) = ParentChannel::stdio(crash.clone());
    let result = match env.role {
        WorkerRole::Server => {
            let mut server = server::adapter_for(&env);
            server::run_server(server.as_mut(), &channel, &mut inbox).await
        }
        WorkerRole::Runner => runner::run_runner(&env, &channel, &mut inbox)
            .await
            .map(|outcome| debug!(target: "suitepool.worker", ?outcome, "runner done")),
    };
    channel.detach().await;

    match result {
        Ok(()) => 0,
        Err(err) => crash.report(&err),
    }
}
