mod config;
mod error;
mod format;
mod log;

pub use config::{LoggerConfig, LoggerWriter};
pub use error::LoggerError;
pub use format::LoggerFormat;

/// Install the global `tracing` subscriber described by `cfg`.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    match cfg.format {
        LoggerFormat::Text => log::init_text(cfg),
        LoggerFormat::Json => log::init_json(cfg),
        LoggerFormat::Journald => log::init_journald(cfg),
    }
}
