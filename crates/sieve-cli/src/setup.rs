//! Configuration loading and error handler wiring for a run.

use anyhow::Context;
use sieve_core::config::WarnLevel;
use sieve_core::{EngineConfig, ErrorHandler};
use std::path::Path;

/// Load `path`, or the defaults when no file is given. Validation warnings
/// go to the host log; validation errors fail the load.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut errors = Vec::new();
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config: {}", errors.join("; "));
    }
    Ok(config)
}

/// Root handler for one run: a log file when one is configured (`log`
/// overrides the config), standard error otherwise. With a username set,
/// every report is prefixed with it.
pub fn error_handler(config: &EngineConfig, log: Option<&Path>) -> ErrorHandler {
    let root = match log.or(config.log_file.as_deref()) {
        Some(path) => ErrorHandler::log_file(path, config.max_errors),
        None => ErrorHandler::stderr(config.max_errors),
    };
    root.set_info_enabled(config.log_info);
    root.set_debug_enabled(config.log_debug);
    root.set_master_mirroring(config.log_master);

    match config.username.as_deref() {
        Some(user) => ErrorHandler::prefixed(&root, None, Some(user)),
        None => root,
    }
}
