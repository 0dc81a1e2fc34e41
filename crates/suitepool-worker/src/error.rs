use thiserror::Error;

use suitepool_exec::ExecError;
use suitepool_model::ModelError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("launch contract: {0}")]
    Env(#[from] ModelError),
    #[error("failed to start {what}: {reason}")]
    Spawn { what: String, reason: String },
    #[error("server did not accept connections on port {port} within {waited_ms}ms")]
    NotListening { port: u16, waited_ms: u64 },
    #[error("server command exited before it was ready ({0})")]
    ServerExited(String),
    #[error("parent channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
