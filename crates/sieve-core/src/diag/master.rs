//! The process-wide master sink.
//!
//! Root handlers with master mirroring enabled copy every report here, and
//! critical failures always land here. By default it is a handler writing to
//! the host's `tracing` log; [`install`] replaces it and [`reset`] restores
//! the default.

use super::{non_empty, ErrorHandler, Level, Sink};
use std::sync::{OnceLock, PoisonError, RwLock};

static MASTER: RwLock<Option<ErrorHandler>> = RwLock::new(None);
static SYSTEM: OnceLock<ErrorHandler> = OnceLock::new();

/// Sink forwarding to `tracing` under the `sieve` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn emit(
        &mut self,
        _parent: Option<&ErrorHandler>,
        level: Level,
        location: Option<&str>,
        message: &str,
    ) {
        let text = match non_empty(location) {
            Some(loc) => format!("sieve: {loc}: {message}"),
            None => format!("sieve: {message}"),
        };
        match level {
            Level::Error => tracing::error!(target: "sieve", "{text}"),
            Level::Warning => tracing::warn!(target: "sieve", "{text}"),
            Level::Info => tracing::info!(target: "sieve", "{text}"),
            Level::Debug => tracing::debug!(target: "sieve", "{text}"),
        }
    }
}

/// A fresh root handler writing to the host log. Info and debug pass
/// through; filtering is left to the `tracing` subscriber.
pub fn host_log_handler(max_errors: u32) -> ErrorHandler {
    let handler = ErrorHandler::new(TracingSink, max_errors);
    handler.set_info_enabled(true);
    handler.set_debug_enabled(true);
    handler
}

fn system() -> &'static ErrorHandler {
    SYSTEM.get_or_init(|| host_log_handler(0))
}

/// The master handler currently in effect.
pub fn current() -> ErrorHandler {
    let installed = MASTER.read().unwrap_or_else(PoisonError::into_inner);
    match installed.as_ref() {
        Some(handler) => handler.clone(),
        None => system().clone(),
    }
}

/// Replace the master handler, returning the one that was installed.
///
/// The previous handle is handed back rather than dropped under the lock,
/// since its teardown may itself report to the master sink.
pub fn install(handler: ErrorHandler) -> Option<ErrorHandler> {
    let mut installed = MASTER.write().unwrap_or_else(PoisonError::into_inner);
    installed.replace(handler)
}

/// Restore the default host-log master handler.
pub fn reset() {
    let previous = {
        let mut installed = MASTER.write().unwrap_or_else(PoisonError::into_inner);
        installed.take()
    };
    drop(previous);
}
