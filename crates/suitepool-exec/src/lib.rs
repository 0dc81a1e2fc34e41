//! OS-process side of the worker launcher: spawning, JSON-lines framing
//! and termination of worker processes.
mod error;
pub use error::{ExecError, ExecResult};

pub mod framing;
pub use framing::{MessageReader, MessageWriter};

pub mod limits;
pub use limits::{ProcessLimits, attach_limits};

pub mod launcher;
pub use launcher::ProcessLauncher;

pub mod util;
pub use util::{kill_now, terminate};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{ProcessLauncher, ProcessLimits};
}
