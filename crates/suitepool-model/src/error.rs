use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing launch variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
    #[error("unknown suite type: {0} (expected: tap|cucumber)")]
    UnknownSuiteType(String),
    #[error("unknown worker script: {0} (expected: server|runner)")]
    UnknownRole(String),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
}
