use std::io::IsTerminal;

use crate::logger::format::LoggerFormat;

/// Stream the fmt layers write to.
///
/// Worker processes talk to their parent over stdout, so they log to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerWriter {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    pub writer: LoggerWriter,
}

impl LoggerConfig {
    /// Stderr output, colour only on a tty.
    ///
    /// For processes whose stdout carries data: workers use it as the message
    /// channel, the coordinator prints the report there.
    pub fn worker() -> Self {
        Self {
            writer: LoggerWriter::Stderr,
            use_color: std::io::stderr().is_terminal(),
            ..Self::default()
        }
    }

    /// Switch to `debug` when `TEST_DEBUG=1` was requested.
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug {
            self.level = "debug".to_string();
        }
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
            writer: LoggerWriter::Stdout,
        }
    }
}
