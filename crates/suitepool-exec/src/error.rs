use thiserror::Error;

use suitepool_core::CoreError;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("missing {0} pipe")]
    MissingPipe(&'static str),
    #[error("channel closed")]
    ChannelClosed,
    #[error("malformed message: {0}")]
    Codec(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe => ExecError::ChannelClosed,
            _ => ExecError::Io(e.to_string()),
        }
    }
}

impl From<suitepool_model::ModelError> for ExecError {
    fn from(e: suitepool_model::ModelError) -> Self {
        ExecError::Codec(e.to_string())
    }
}

impl From<ExecError> for CoreError {
    fn from(e: ExecError) -> Self {
        CoreError::Launch(e.to_string())
    }
}
