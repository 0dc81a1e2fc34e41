use std::{io, process::ExitStatus, time::Duration};

#[cfg(unix)]
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::process::Child;
use tracing::debug;

/// Kill the process unconditionally and reap it.
pub async fn kill_now(child: &mut Child) -> io::Result<ExitStatus> {
    child.kill().await?;
    child.wait().await
}

/// `SIGTERM`, then [`kill_now`] if the process is still alive after `grace`.
#[cfg(unix)]
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    if let Some(pid) = child.id() {
        if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(target: "suitepool.exec", pid, error = %err, "SIGTERM failed");
        }
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            debug!(target: "suitepool.exec", pid = child.id(), "still alive after SIGTERM, killing");
            kill_now(child).await
        }
    }
}

#[cfg(not(unix))]
pub async fn terminate(child: &mut Child, _grace: Duration) -> io::Result<ExitStatus> {
    kill_now(child).await
}
