//! POSIX rlimits applied to spawned worker processes.
//!
//! On Unix the limits are installed from a `pre_exec` hook, after `fork()`
//! and before `execve()`, so a worker never runs unrestricted. Elsewhere
//! they are ignored with a warning.
use tokio::process::Command;
#[cfg(not(unix))]
use tracing::warn;

/// Hard ceilings for one worker process. `None` keeps the inherited limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessLimits {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; growing a file past it raises `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_AS`. Unlike the watchdog's memory warning this one is fatal.
    pub max_address_space_bytes: Option<u64>,
    /// `RLIMIT_CORE = 0`.
    pub disable_core_dumps: bool,
}

impl ProcessLimits {
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && self.max_file_size_bytes.is_none()
            && self.max_address_space_bytes.is_none()
            && !self.disable_core_dumps
    }
}

pub fn attach_limits(cmd: &mut Command, limits: &ProcessLimits) {
    if limits.is_empty() {
        return;
    }

    #[cfg(unix)]
    {
        unix_impl::attach_limits(cmd, *limits);
    }

    #[cfg(not(unix))]
    {
        let _ = cmd;
        warn!(
            target: "suitepool.exec",
            ?limits,
            "process limits are not supported on this platform, ignoring"
        );
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::io;

    use tokio::process::Command;

    use super::ProcessLimits;

    pub fn attach_limits(cmd: &mut Command, limits: ProcessLimits) {
        // SAFETY: the hook only calls async-signal-safe `setrlimit`.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(n) = limits.max_open_files {
                    apply(libc::RLIMIT_NOFILE, n)?;
                }
                if let Some(n) = limits.max_file_size_bytes {
                    apply(libc::RLIMIT_FSIZE, n)?;
                }
                if let Some(n) = limits.max_address_space_bytes {
                    apply(libc::RLIMIT_AS, n)?;
                }
                if limits.disable_core_dumps {
                    apply(libc::RLIMIT_CORE, 0)?;
                }
                Ok(())
            });
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    fn apply(resource: Resource, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
