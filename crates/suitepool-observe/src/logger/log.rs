use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::OffsetTime, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{
    config::{LoggerConfig, LoggerWriter},
    error::LoggerError,
};

pub(crate) fn init_text(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let layer = fmt::layer()
        .with_ansi(cfg.use_color)
        .with_target(cfg.with_targets)
        .with_timer(local_timer())
        .with_writer(writer(cfg.writer));
    install(tracing_subscriber::registry().with(filter(&cfg.level)?).with(layer))
}

pub(crate) fn init_json(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_timer(local_timer())
        .with_writer(writer(cfg.writer));
    install(tracing_subscriber::registry().with(filter(&cfg.level)?).with(layer))
}

#[cfg(all(target_os = "linux", feature = "journald"))]
pub(crate) fn init_journald(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let journald = tracing_journald::layer().map_err(|e| LoggerError::Init(format!("journald: {e}")))?;
    install(tracing_subscriber::registry().with(filter(&cfg.level)?).with(journald))
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
pub(crate) fn init_journald(_cfg: &LoggerConfig) -> Result<(), LoggerError> {
    Err(LoggerError::JournaldUnavailable)
}

/// `RUST_LOG` wins over the configured level.
fn filter(level: &str) -> Result<EnvFilter, LoggerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLevel(level.to_string()))
}

fn writer(target: LoggerWriter) -> BoxMakeWriter {
    match target {
        LoggerWriter::Stdout => BoxMakeWriter::new(std::io::stdout),
        LoggerWriter::Stderr => BoxMakeWriter::new(std::io::stderr),
    }
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn install<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let msg = e.to_string();
        if msg.contains("SetGlobalDefaultError") {
            LoggerError::AlreadyInitialized
        } else {
            LoggerError::Init(msg)
        }
    })
}
