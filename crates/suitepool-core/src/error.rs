use thiserror::Error;

use suitepool_model::{ModelError, WorkerId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no test suites to run")]
    NoSuites,
    #[error("invalid batch {current} of {count}")]
    InvalidBatch { count: usize, current: usize },
    #[error("unable to allocate {wanted} free ports (found {found})")]
    PortAllocation { wanted: usize, found: usize },
    #[error("failed to launch worker: {0}")]
    Launch(String),
    #[error("channel to worker {0} is closed")]
    ChannelClosed(WorkerId),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("report sink: {0}")]
    Report(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
