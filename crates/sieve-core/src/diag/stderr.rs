use super::{format_line, ErrorHandler, Level, Sink};
use std::io::Write;

/// Writes every message to the process's standard error stream.
#[derive(Debug, Default)]
pub struct StderrSink;

impl Sink for StderrSink {
    fn emit(
        &mut self,
        _parent: Option<&ErrorHandler>,
        level: Level,
        location: Option<&str>,
        message: &str,
    ) {
        let line = format_line(level, location, message, false);
        // Nowhere left to report a failing stderr.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}
